//! # chanio-http - a blocking HTTP/1.1 client on chanio
//!
//! [`HttpClient`] opens one connection per request on its own event loop,
//! builds the pipeline
//!
//! ```text
//! [TlsHandler] -> HttpClientCodec -> HttpResponseHandler
//! ```
//!
//! (the TLS stage only for `https` URLs), writes the request and blocks the
//! caller on a [`SyncGate`](chanio_executor::SyncGate) until the response is
//! complete or the exchange fails.
//!
//! ```rust,no_run
//! use chanio_http::{GetUrl, HttpClient, HttpClientConfig, Scheme};
//!
//! let client = HttpClient::new(HttpClientConfig::default()).unwrap();
//! let url = GetUrl::new(Scheme::Http, "localhost")
//!     .with_port(8080)
//!     .with_path(["api", "time"])
//!     .with_query("zone=UTC");
//! match client.get(&url) {
//!     Ok(response) => println!("{}", response),
//!     Err(err) => eprintln!("GET {} failed: {}", url, err),
//! }
//! ```
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

/// Blocking client
pub mod client;

/// Client settings
pub mod config;

/// Terminal pipeline stage collecting one response
pub mod handler;

/// Outbound request
pub mod request;

/// Completed response
pub mod response;

/// Request URLs
pub mod url;

pub use client::HttpClient;
pub use config::HttpClientConfig;
pub use handler::HttpResponseHandler;
pub use request::{HttpRequest, DEFAULT_ACCEPT, DEFAULT_USER_AGENT};
pub use response::{HttpResponse, ResponseBody};
pub use url::{GetUrl, Scheme};
