use chanio_transport::ByteBuffer;
use http::{HeaderMap, Method, StatusCode, Version};

/// One piece of an HTTP message as it travels through a pipeline.
///
/// A message is always `Head`, zero or more `Body`, then `End`. `End` carries
/// the trailers of a chunked message, if it had any.
#[derive(Debug, PartialEq)]
pub enum HttpPart<H> {
    /// Start line and headers.
    Head(H),
    /// A slice of the body, in arrival order.
    Body(ByteBuffer),
    /// End of the message, with optional trailers.
    End(Option<HeaderMap>),
}

/// Request line and headers of an outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequestHead {
    /// Request method.
    pub method: Method,
    /// Request target as written on the request line, e.g. `/search?q=rust`.
    pub target: String,
    /// Protocol version.
    pub version: Version,
    /// Request headers.
    pub headers: HeaderMap,
}

impl HttpRequestHead {
    /// Creates an HTTP/1.1 head with no headers.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
        }
    }
}

/// Status line and headers of an inbound response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponseHead {
    /// Response status.
    pub status: StatusCode,
    /// Protocol version.
    pub version: Version,
    /// Response headers.
    pub headers: HeaderMap,
}

/// What a client writes into the HTTP codec.
pub type HttpClientRequestPart = HttpPart<HttpRequestHead>;

/// What the HTTP codec hands to the stages above it on a client.
pub type HttpClientResponsePart = HttpPart<HttpResponseHead>;
