//! The bootstrap APIs which bind a pipeline to each TCP connection and drive it
//! on an event loop.
//!
//! - [`ClientBootstrap`]: resolve, connect, build the pipeline, start driving
//! - [`ServerBootstrap`]: accept on a parent loop, serve on a child [`EventLoopGroup`]
//! - [`Connection`]: the thread-safe handle for writing to and closing a connection
//!
//! Each connection is driven by one task on its loop. The task flushes what the
//! pipeline has to write, then waits for the first of: loop shutdown, a
//! request through the [`Connection`] handle, a pipeline wake-up, a handler
//! timer, or readable bytes on the socket.
//!
//! [`EventLoopGroup`]: chanio_executor::EventLoopGroup
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

use std::sync::Arc;

use chanio::{Error, Pipeline};
use chanio_transport::ByteBuffer;

mod client;
mod connection;
mod driver;
mod server;

pub use client::ClientBootstrap;
pub use connection::Connection;
pub use server::{ServerBootstrap, ServerChannel};

/// Installs the handlers of a new connection's pipeline.
///
/// Called on the connection's event loop, once per connection, before the
/// pipeline sees any event.
pub type PipelineInitializer<W> =
    Arc<dyn Fn(&Pipeline<ByteBuffer, W>) -> Result<(), Error> + Send + Sync>;
