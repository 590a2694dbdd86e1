//! # chanio-transport - buffers and socket settings
//!
//! - [`ByteBuffer`]: the byte message every chanio pipeline starts and ends with
//! - [`RecvBufferAllocator`] / [`RecvBufferSizer`]: how much to read per socket read
//! - [`SocketOptions`]: per-connection socket settings used by the bootstraps
//!
//! ```rust
//! use chanio_transport::ByteBuffer;
//!
//! let mut buf = ByteBuffer::new();
//! buf.write_string("GET / HTTP/1.1\r\n");
//! assert_eq!(buf.read_string(3).unwrap().as_deref(), Some("GET"));
//! assert_eq!(buf.readable_bytes(), 13);
//! ```
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

mod byte_buffer;
mod options;
mod recv_allocator;

pub use byte_buffer::ByteBuffer;
pub use options::SocketOptions;
pub use recv_allocator::{RecvBufferAllocator, RecvBufferSizer};
