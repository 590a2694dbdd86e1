//! # chanio-executor - event loops for chanio connections
//!
//! - [`EventLoop`]: one named thread running a tokio current-thread runtime
//!   inside a `LocalSet`. Every connection is bound to exactly one loop, and all
//!   of its callbacks run there.
//! - [`EventLoopGroup`]: N independent loops, handed out round-robin.
//! - [`EventLoopPromise`] / [`EventLoopFuture`]: write-once results whose
//!   continuations run on the owning loop.
//! - [`sync_gate`]: the bridge that lets a plain thread block until the loop
//!   produces an outcome.
//!
//! ```rust,no_run
//! use chanio_executor::EventLoop;
//!
//! let event_loop = EventLoop::new("worker").unwrap();
//! let answer = event_loop.submit(|| 6 * 7).wait().unwrap();
//! assert_eq!(answer, 42);
//! event_loop.shutdown_gracefully().unwrap();
//! ```
//!
//! ## CPU Pinning
//!
//! ```rust,no_run
//! use chanio_executor::EventLoopBuilder;
//! use core_affinity::CoreId;
//!
//! let event_loop = EventLoopBuilder::new()
//!     .name("pinned")
//!     .core_id(CoreId { id: 0 })
//!     .build()
//!     .unwrap();
//! # event_loop.shutdown_gracefully().unwrap();
//! ```
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

mod event_loop;
mod future;
mod group;
mod sync_gate;

pub use event_loop::{spawn_local, EventLoop, EventLoopBuilder, Registration, Task};
pub use future::{EventLoopFuture, EventLoopPromise};
pub use group::EventLoopGroup;
pub use sync_gate::{sync_gate, GateSignal, SyncGate};
