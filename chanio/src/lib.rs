//! # chanio - pipelined network client core
//!
//! `chanio` models a connection as an ordered chain of protocol stages.
//! Each stage is a [`Handler`]; the chain is a [`Pipeline`] owned by exactly one
//! connection and driven by exactly one event loop thread.
//!
//! ## Event Flow
//!
//! - **Inbound** (head to tail): socket → TLS → HTTP codec → terminal handler
//! - **Outbound** (tail to head): application → HTTP codec → TLS → socket
//!
//! ```text
//!                                        | write()
//!   +------------------------------------+---------+
//!   |                  Pipeline          |         |
//!   |                                   \|/        |
//!   |    +----------------------------------+      |
//!   |    |            Handler  N            |      |
//!   |    +----------------------------------+      |
//!   |              /|\                |            |
//!   |               |                \|/           |
//!   |    +----------------------------------+      |
//!   |    |            Handler  1            |      |
//!   |    +----------------------------------+      |
//!   |              /|\                |            |
//!   +---------------+-----------------+------------+
//!                   |                \|/
//!   +---------------+-----------------+------------+
//!   |      handle_read()          poll_write()     |
//!   |            Connection driver / socket        |
//!   +----------------------------------------------+
//! ```
//!
//! This crate is I/O-free: it contains the handler contract and the chain.
//! Sockets, event loops and concrete stages live in the sibling crates.
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

/// Error kinds shared across the workspace
pub(crate) mod error;

/// Handler trait and per-handler context
pub(crate) mod handler;

/// Internal handler types (not part of public API)
pub(crate) mod handler_internal;

/// Pipeline of handlers
pub(crate) mod pipeline;

/// Internal pipeline types (not part of public API)
pub(crate) mod pipeline_internal;

pub use error::{BoxError, Error};
pub use handler::{Context, Handler};
pub use pipeline::{InboundPipeline, OutboundPipeline, Pipeline};

#[doc(hidden)]
pub use pipeline_internal::PipelineSignals;

/// Name of the tail stage every pipeline carries; user handlers may not use it.
pub const RESERVED_PIPELINE_HANDLE_NAME: &str = "ReservedPipelineHandlerName";

/// Callback the connection driver installs to be woken when a pipeline has
/// outbound data or a close request.
pub type NotifyCallback = std::sync::Arc<dyn Fn() + Send + Sync>;
