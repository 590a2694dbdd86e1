use std::fmt::Write;

use bytes::BytesMut;
use chanio::Error;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Method, Version};
use log::{trace, warn};
use tokio_util::codec::Encoder;

use crate::http_message::{HttpClientRequestPart, HttpPart, HttpRequestHead};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    None,
    Length,
    Chunked,
}

/// Encoder for HTTP/1.1 requests on the client side of a connection.
///
/// The body is framed by `Content-Length` when the head carries one. A
/// `POST`, `PUT` or `PATCH` without it is sent chunked, with the
/// `Transfer-Encoding` header added. Any other request is sent without a body.
#[derive(Debug)]
pub struct RequestEncoder {
    framing: BodyFraming,
}

impl Default for RequestEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestEncoder {
    /// Creates an encoder waiting for a request head.
    pub fn new() -> Self {
        Self {
            framing: BodyFraming::None,
        }
    }

    fn encode_head(&mut self, mut head: HttpRequestHead, dst: &mut BytesMut) -> Result<(), Error> {
        self.framing = if head.headers.contains_key(CONTENT_LENGTH) {
            BodyFraming::Length
        } else if head.headers.contains_key(TRANSFER_ENCODING) {
            BodyFraming::Chunked
        } else if has_body(&head.method) {
            head.headers
                .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            BodyFraming::Chunked
        } else {
            BodyFraming::None
        };

        let version = match head.version {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            version => {
                return Err(Error::Other(format!(
                    "unsupported http version {:?}",
                    version
                )))
            }
        };
        write!(dst, "{} {} {}\r\n", head.method, head.target, version).map_err(fmt_error)?;
        write_headers(&head.headers, dst);
        dst.extend_from_slice(b"\r\n");

        trace!(
            "encoded request head {} {}, framing {:?}",
            head.method,
            head.target,
            self.framing
        );
        Ok(())
    }
}

impl Encoder<HttpClientRequestPart> for RequestEncoder {
    type Error = Error;

    fn encode(&mut self, item: HttpClientRequestPart, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            HttpPart::Head(head) => self.encode_head(head, dst),
            HttpPart::Body(buf) => {
                if buf.is_empty() {
                    return Ok(());
                }
                match self.framing {
                    BodyFraming::Length => dst.extend_from_slice(buf.readable()),
                    BodyFraming::Chunked => {
                        write!(dst, "{:X}\r\n", buf.readable_bytes()).map_err(fmt_error)?;
                        dst.extend_from_slice(buf.readable());
                        dst.extend_from_slice(b"\r\n");
                    }
                    BodyFraming::None => {
                        warn!(
                            "dropping {} body bytes of a request without body framing",
                            buf.readable_bytes()
                        );
                    }
                }
                Ok(())
            }
            HttpPart::End(trailers) => {
                if self.framing == BodyFraming::Chunked {
                    dst.extend_from_slice(b"0\r\n");
                    if let Some(trailers) = trailers {
                        write_headers(&trailers, dst);
                    }
                    dst.extend_from_slice(b"\r\n");
                }
                self.framing = BodyFraming::None;
                Ok(())
            }
        }
    }
}

fn has_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

fn write_headers(headers: &HeaderMap, dst: &mut BytesMut) {
    for (name, value) in headers.iter() {
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
}

fn fmt_error(err: std::fmt::Error) -> Error {
    Error::Other(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanio_transport::ByteBuffer;

    fn encode(parts: Vec<HttpClientRequestPart>) -> String {
        let mut encoder = RequestEncoder::new();
        let mut dst = BytesMut::new();
        for part in parts {
            encoder.encode(part, &mut dst).unwrap();
        }
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn test_get_without_body() {
        let mut head = HttpRequestHead::new(Method::GET, "/foo?time_zone%3DAsia%2FTokyo");
        head.headers
            .insert("host", HeaderValue::from_static("localhost:8080"));

        let encoded = encode(vec![HttpPart::Head(head), HttpPart::End(None)]);
        assert_eq!(
            encoded,
            "GET /foo?time_zone%3DAsia%2FTokyo HTTP/1.1\r\nhost: localhost:8080\r\n\r\n"
        );
    }

    #[test]
    fn test_content_length_body_is_raw() {
        let mut head = HttpRequestHead::new(Method::PUT, "/items/1");
        head.headers.insert(CONTENT_LENGTH, HeaderValue::from(4));

        let encoded = encode(vec![
            HttpPart::Head(head),
            HttpPart::Body(ByteBuffer::from("data")),
            HttpPart::End(None),
        ]);
        assert_eq!(encoded, "PUT /items/1 HTTP/1.1\r\ncontent-length: 4\r\n\r\ndata");
    }

    #[test]
    fn test_post_without_length_is_chunked() {
        let head = HttpRequestHead::new(Method::POST, "/upload");

        let mut trailers = HeaderMap::new();
        trailers.insert("x-checksum", HeaderValue::from_static("abc"));
        let encoded = encode(vec![
            HttpPart::Head(head),
            HttpPart::Body(ByteBuffer::from("hello")),
            HttpPart::Body(ByteBuffer::from(" chunked world")),
            HttpPart::End(Some(trailers)),
        ]);
        assert_eq!(
            encoded,
            "POST /upload HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n\
             5\r\nhello\r\nE\r\n chunked world\r\n0\r\nx-checksum: abc\r\n\r\n"
        );
    }

    #[test]
    fn test_body_on_get_is_dropped() {
        let head = HttpRequestHead::new(Method::GET, "/");

        let encoded = encode(vec![
            HttpPart::Head(head),
            HttpPart::Body(ByteBuffer::from("ignored")),
            HttpPart::End(None),
        ]);
        assert_eq!(encoded, "GET / HTTP/1.1\r\n\r\n");
    }
}
