//! # chanio-codec - protocol stages for chanio pipelines
//!
//! Reusable [`Handler`](chanio::Handler)s that sit between the socket and the
//! application:
//!
//! - [`TlsHandler`]: client-side TLS on top of `rustls`
//! - [`HttpClientCodec`]: HTTP/1.1 request encoding and response decoding
//! - [`StringCodec`]: UTF-8 strings over byte buffers
//! - [`LoggingHandler`]: logs every event crossing it and forwards it unchanged
//!
//! ## Building an HTTPS pipeline
//!
//! ```rust,no_run
//! use chanio::Pipeline;
//! use chanio_codec::{HttpClientCodec, HttpClientRequestPart, TlsConfig, TlsHandler};
//! use chanio_transport::ByteBuffer;
//!
//! let config = TlsConfig::with_webpki_roots().unwrap();
//!
//! let pipeline: Pipeline<ByteBuffer, HttpClientRequestPart> = Pipeline::new();
//! pipeline.add_last(TlsHandler::new(&config, "example.com").unwrap()).unwrap();
//! pipeline.add_last(HttpClientCodec::new()).unwrap();
//! // pipeline.add_last(your_response_handler);
//! let pipeline = pipeline.finalize();
//! ```
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

/// HTTP/1.1 client codec stage
pub mod http_codec;

/// HTTP/1.1 response decoder
pub mod http_decoder;

/// HTTP/1.1 request encoder
pub mod http_encoder;

/// HTTP message parts exchanged with the codec
pub mod http_message;

/// Pass-through logging stage
pub mod logging_handler;

/// UTF-8 string codec stage
pub mod string_codec;

/// TLS client stage
pub mod tls;

pub use http_codec::HttpClientCodec;
pub use http_decoder::ResponseDecoder;
pub use http_encoder::RequestEncoder;
pub use http_message::{
    HttpClientRequestPart, HttpClientResponsePart, HttpPart, HttpRequestHead, HttpResponseHead,
};
pub use logging_handler::LoggingHandler;
pub use string_codec::StringCodec;
pub use tls::{TlsConfig, TlsHandler};
