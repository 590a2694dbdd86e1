//! HTTP/1.1 response decoder.
//!
//! Turns a byte stream into [`HttpClientResponsePart`]s: one `Head`, the body
//! as `Body` slices, and an `End` per response. Heads are parsed with
//! `httparse`; the body framing is picked from the status, the request method
//! and the `Transfer-Encoding` / `Content-Length` headers.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum head size: 8KB

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use chanio::Error;
use chanio_transport::ByteBuffer;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use log::trace;
use tokio_util::codec::Decoder;

use crate::http_message::{HttpClientResponsePart, HttpPart, HttpResponseHead};

/// Maximum number of headers allowed in a response
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire head section
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Maximum length of a chunk size line or a trailer line
const MAX_LINE_BYTES: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// Exactly this many body bytes remain.
    Length(u64),
    /// Chunked transfer coding.
    Chunked(ChunkedState),
    /// The body runs until the peer closes the connection.
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    Data(u64),
    DataCrlf,
    Trailers,
}

#[derive(Debug)]
enum State {
    Head,
    Body(Framing),
    End,
    Failed,
}

/// Decoder for HTTP/1.1 responses on the client side of a connection.
///
/// Responses to `HEAD` carry no body whatever their headers say, so the
/// decoder has to know which method each response answers: call
/// [`ResponseDecoder::expect_response`] for every request sent.
#[derive(Debug)]
pub struct ResponseDecoder {
    state: State,
    requests: VecDeque<Method>,
    trailers: HeaderMap,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    /// Creates a decoder waiting for a response head.
    pub fn new() -> Self {
        Self {
            state: State::Head,
            requests: VecDeque::new(),
            trailers: HeaderMap::new(),
        }
    }

    /// Records that a request with `method` was sent and its response is due.
    pub fn expect_response(&mut self, method: Method) {
        self.requests.push_back(method);
    }

    /// Whether a malformed message stopped the decoder.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, State::Failed)
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> Result<Option<HttpClientResponsePart>, Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut res = httparse::Response::new(&mut headers);

        let head_len = match res.parse(&src[..]).map_err(|err| match err {
            httparse::Error::TooManyHeaders => {
                Error::CodecDecode(format!("more than {} response headers", MAX_HEADER_NUM))
            }
            err => Error::CodecDecode(format!("invalid response head: {}", err)),
        })? {
            httparse::Status::Complete(head_len) => head_len,
            httparse::Status::Partial => {
                if src.len() > MAX_HEADER_BYTES {
                    return Err(too_large_head(src.len()));
                }
                return Ok(None);
            }
        };
        if head_len > MAX_HEADER_BYTES {
            return Err(too_large_head(head_len));
        }

        let version = match res.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            version => {
                return Err(Error::CodecDecode(format!(
                    "unsupported http version {:?}",
                    version
                )))
            }
        };
        let status = res
            .code
            .ok_or_else(|| Error::CodecDecode("missing status code".to_string()))
            .and_then(|code| {
                StatusCode::from_u16(code)
                    .map_err(|err| Error::CodecDecode(format!("invalid status code: {}", err)))
            })?;

        let mut header_map = HeaderMap::with_capacity(res.headers.len());
        for header in res.headers.iter() {
            let (name, value) = parse_header(header.name.as_bytes(), header.value)?;
            header_map.append(name, value);
        }
        src.advance(head_len);

        let head = HttpResponseHead {
            status,
            version,
            headers: header_map,
        };
        self.state = match self.framing(&head)? {
            Some(framing) => State::Body(framing),
            None => State::End,
        };
        trace!(
            "decoded response head {} ({} bytes), framing {:?}",
            head.status,
            head_len,
            self.state
        );

        Ok(Some(HttpPart::Head(head)))
    }

    /// Picks the body framing of a response, `None` when it has no body.
    fn framing(&mut self, head: &HttpResponseHead) -> Result<Option<Framing>, Error> {
        // an interim response is followed by the real one to the same request
        if head.status.is_informational() {
            return Ok(None);
        }
        let method = self.requests.pop_front();

        if method == Some(Method::HEAD)
            || head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            return Ok(None);
        }

        if is_chunked(head.headers.get(TRANSFER_ENCODING)) {
            return Ok(Some(Framing::Chunked(ChunkedState::Size)));
        }

        if let Some(value) = head.headers.get(CONTENT_LENGTH) {
            let length = value
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    Error::CodecDecode(format!("invalid content-length {:?}", value))
                })?;
            return Ok(if length == 0 {
                None
            } else {
                Some(Framing::Length(length))
            });
        }

        Ok(Some(Framing::UntilClose))
    }

    fn decode_body(
        &mut self,
        framing: Framing,
        src: &mut BytesMut,
    ) -> Result<Option<HttpClientResponsePart>, Error> {
        match framing {
            Framing::Length(remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }
                let n = remaining.min(src.len() as u64);
                let body = src.split_to(n as usize);
                self.state = if n == remaining {
                    State::End
                } else {
                    State::Body(Framing::Length(remaining - n))
                };
                Ok(Some(HttpPart::Body(ByteBuffer::from(body))))
            }
            Framing::UntilClose => {
                if src.is_empty() {
                    return Ok(None);
                }
                let body = src.split();
                Ok(Some(HttpPart::Body(ByteBuffer::from(body))))
            }
            Framing::Chunked(chunked) => self.decode_chunked(chunked, src),
        }
    }

    fn decode_chunked(
        &mut self,
        mut chunked: ChunkedState,
        src: &mut BytesMut,
    ) -> Result<Option<HttpClientResponsePart>, Error> {
        loop {
            match chunked {
                ChunkedState::Size => {
                    let line = match take_line(src)? {
                        Some(line) => line,
                        None => break,
                    };
                    let size = parse_chunk_size(&line)?;
                    trace!("chunk of {} bytes", size);
                    chunked = if size == 0 {
                        ChunkedState::Trailers
                    } else {
                        ChunkedState::Data(size)
                    };
                }
                ChunkedState::Data(remaining) => {
                    if src.is_empty() {
                        break;
                    }
                    let n = remaining.min(src.len() as u64);
                    let body = src.split_to(n as usize);
                    self.state = State::Body(Framing::Chunked(if n == remaining {
                        ChunkedState::DataCrlf
                    } else {
                        ChunkedState::Data(remaining - n)
                    }));
                    return Ok(Some(HttpPart::Body(ByteBuffer::from(body))));
                }
                ChunkedState::DataCrlf => {
                    if src.len() < 2 {
                        break;
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(Error::CodecDecode(
                            "missing CRLF after chunk data".to_string(),
                        ));
                    }
                    src.advance(2);
                    chunked = ChunkedState::Size;
                }
                ChunkedState::Trailers => {
                    let line = match take_line(src)? {
                        Some(line) => line,
                        None => break,
                    };
                    if line.is_empty() {
                        self.state = State::Head;
                        let trailers = std::mem::take(&mut self.trailers);
                        return Ok(Some(HttpPart::End(if trailers.is_empty() {
                            None
                        } else {
                            Some(trailers)
                        })));
                    }
                    let (name, value) = parse_trailer(&line)?;
                    self.trailers.append(name, value);
                }
            }
        }

        self.state = State::Body(Framing::Chunked(chunked));
        Ok(None)
    }
}

impl Decoder for ResponseDecoder {
    type Item = HttpClientResponsePart;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let res = match self.state {
            State::Head => {
                if src.is_empty() {
                    return Ok(None);
                }
                self.decode_head(src)
            }
            State::Body(framing) => self.decode_body(framing, src),
            State::End => {
                self.state = State::Head;
                return Ok(Some(HttpPart::End(None)));
            }
            State::Failed => {
                src.clear();
                return Ok(None);
            }
        };

        if res.is_err() {
            self.state = State::Failed;
            src.clear();
        }
        res
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(part) = self.decode(src)? {
            return Ok(Some(part));
        }

        match self.state {
            State::Head if src.is_empty() => Ok(None),
            State::Body(Framing::UntilClose) => {
                self.state = State::Head;
                Ok(Some(HttpPart::End(None)))
            }
            State::Failed => Ok(None),
            _ => {
                trace!("eof while decoding {:?}", self.state);
                self.state = State::Failed;
                src.clear();
                Err(Error::PrematureClose)
            }
        }
    }
}

fn too_large_head(len: usize) -> Error {
    Error::CodecDecode(format!(
        "response head of {} bytes exceeds {} bytes",
        len, MAX_HEADER_BYTES
    ))
}

fn parse_header(name: &[u8], value: &[u8]) -> Result<(HeaderName, HeaderValue), Error> {
    let name = HeaderName::from_bytes(name)
        .map_err(|err| Error::CodecDecode(format!("invalid header name: {}", err)))?;
    let value = HeaderValue::from_bytes(value)
        .map_err(|err| Error::CodecDecode(format!("invalid header value: {}", err)))?;
    Ok((name, value))
}

fn parse_trailer(line: &[u8]) -> Result<(HeaderName, HeaderValue), Error> {
    let colon = line
        .iter()
        .position(|b| *b == b':')
        .ok_or_else(|| Error::CodecDecode("trailer without ':'".to_string()))?;
    parse_header(&line[..colon], line[colon + 1..].trim_ascii())
}

/// Splits off one CRLF-terminated line, without the CRLF.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, Error> {
    match src.windows(2).position(|window| window == b"\r\n") {
        Some(end) => {
            let line = src.split_to(end);
            src.advance(2);
            Ok(Some(line))
        }
        None if src.len() > MAX_LINE_BYTES => Err(Error::CodecDecode(format!(
            "line exceeds {} bytes",
            MAX_LINE_BYTES
        ))),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, Error> {
    // chunk extensions are ignored
    let size = line.split(|b| *b == b';').next().unwrap_or_default();
    std::str::from_utf8(size)
        .ok()
        .and_then(|size| u64::from_str_radix(size.trim(), 16).ok())
        .ok_or_else(|| {
            Error::CodecDecode(format!(
                "invalid chunk size {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

/// Chunked must be the final transfer coding to frame the body.
fn is_chunked(value: Option<&HeaderValue>) -> bool {
    value
        .and_then(|value| value.as_bytes().rsplit(|b| *b == b',').next())
        .map(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut ResponseDecoder, src: &mut BytesMut) -> Vec<HttpClientResponsePart> {
        let mut parts = vec![];
        while let Some(part) = decoder.decode(src).unwrap() {
            parts.push(part);
        }
        parts
    }

    fn body_of(parts: &[HttpClientResponsePart]) -> String {
        parts
            .iter()
            .filter_map(|part| match part {
                HttpPart::Body(buf) => Some(String::from_utf8_lossy(buf.readable()).to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_content_length_response() {
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::GET);
        let mut src = BytesMut::from(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello",
        );

        let parts = decode_all(&mut decoder, &mut src);
        assert_eq!(parts.len(), 3);
        match &parts[0] {
            HttpPart::Head(head) => {
                assert_eq!(head.status, StatusCode::OK);
                assert_eq!(head.version, Version::HTTP_11);
                assert_eq!(head.headers.get("content-type").unwrap(), "text/plain");
            }
            part => panic!("expected head, got {:?}", part),
        }
        assert_eq!(body_of(&parts), "hello");
        assert_eq!(parts[2], HttpPart::End(None));
        assert!(src.is_empty());
    }

    #[test]
    fn test_informational_response_precedes_final() {
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::GET);
        let mut src = BytesMut::from(
            "HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok",
        );

        let parts = decode_all(&mut decoder, &mut src);
        assert_eq!(parts.len(), 5);
        match &parts[0] {
            HttpPart::Head(head) => assert_eq!(head.status, StatusCode::CONTINUE),
            part => panic!("expected interim head, got {:?}", part),
        }
        assert_eq!(parts[1], HttpPart::End(None));
        match &parts[2] {
            HttpPart::Head(head) => assert_eq!(head.status, StatusCode::OK),
            part => panic!("expected final head, got {:?}", part),
        }
        assert_eq!(body_of(&parts), "ok");
        assert_eq!(parts[4], HttpPart::End(None));
        assert!(src.is_empty());
    }

    #[test]
    fn test_split_reads() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world";
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::GET);

        let mut src = BytesMut::new();
        let mut parts = vec![];
        for byte in raw.iter() {
            src.extend_from_slice(&[*byte]);
            parts.extend(decode_all(&mut decoder, &mut src));
        }

        assert!(matches!(parts.first(), Some(HttpPart::Head(_))));
        assert_eq!(body_of(&parts), "hello world");
        assert_eq!(parts.last(), Some(&HttpPart::End(None)));
    }

    #[test]
    fn test_chunked_with_trailers() {
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::GET);
        let mut src = BytesMut::from(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip, chunked\r\n\r\n\
             5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Checksum: abc\r\n\r\n",
        );

        let parts = decode_all(&mut decoder, &mut src);
        assert_eq!(body_of(&parts), "hello world");
        match parts.last() {
            Some(HttpPart::End(Some(trailers))) => {
                assert_eq!(trailers.get("x-checksum").unwrap(), "abc");
            }
            part => panic!("expected end with trailers, got {:?}", part),
        }
    }

    #[test]
    fn test_head_response_has_no_body() {
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::HEAD);
        decoder.expect_response(Method::GET);
        let mut src = BytesMut::from(
            "HTTP/1.1 200 OK\r\nContent-Length: 1024\r\n\r\n\
             HTTP/1.1 204 No Content\r\n\r\n",
        );

        let parts = decode_all(&mut decoder, &mut src);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1], HttpPart::End(None));
        match &parts[2] {
            HttpPart::Head(head) => assert_eq!(head.status, StatusCode::NO_CONTENT),
            part => panic!("expected head, got {:?}", part),
        }
        assert_eq!(parts[3], HttpPart::End(None));
    }

    #[test]
    fn test_close_delimited_body() {
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::GET);
        let mut src = BytesMut::from("HTTP/1.0 200 OK\r\n\r\nuntil");

        let mut parts = decode_all(&mut decoder, &mut src);
        assert_eq!(parts.last(), Some(&HttpPart::Body(ByteBuffer::from("until"))));

        src.extend_from_slice(b" close");
        parts.extend(decode_all(&mut decoder, &mut src));
        parts.push(decoder.decode_eof(&mut src).unwrap().unwrap());

        assert_eq!(body_of(&parts), "until close");
        assert_eq!(parts.last(), Some(&HttpPart::End(None)));
        assert!(decoder.decode_eof(&mut src).unwrap().is_none());
    }

    #[test]
    fn test_eof_inside_length_body_is_premature() {
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::GET);
        let mut src = BytesMut::from("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort");

        decode_all(&mut decoder, &mut src);
        assert!(matches!(
            decoder.decode_eof(&mut src),
            Err(Error::PrematureClose)
        ));
    }

    #[test]
    fn test_malformed_head_stops_decoding() {
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::GET);
        let mut src = BytesMut::from("HTTP/1.1 abc OK\r\n\r\n");

        assert!(matches!(
            decoder.decode(&mut src),
            Err(Error::CodecDecode(_))
        ));
        assert!(decoder.is_failed());

        src.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        assert!(decoder.decode(&mut src).unwrap().is_none());
        assert!(src.is_empty());
    }

    #[test]
    fn test_bad_chunk_size() {
        let mut decoder = ResponseDecoder::new();
        decoder.expect_response(Method::GET);
        let mut src =
            BytesMut::from("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n");

        assert!(matches!(decoder.decode(&mut src), Ok(Some(HttpPart::Head(_)))));
        assert!(matches!(
            decoder.decode(&mut src),
            Err(Error::CodecDecode(_))
        ));
    }

    #[test]
    fn test_oversized_head() {
        let mut decoder = ResponseDecoder::new();
        let mut src = BytesMut::from("HTTP/1.1 200 OK\r\n");
        src.extend_from_slice(format!("X-Big: {}\r\n", "a".repeat(MAX_HEADER_BYTES)).as_bytes());

        assert!(matches!(
            decoder.decode(&mut src),
            Err(Error::CodecDecode(_))
        ));
    }
}
