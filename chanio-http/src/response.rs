use std::fmt;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode, Version};

/// Body of a completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// The response carried no body bytes.
    Empty,
    /// A textual body, decoded as UTF-8.
    Text(String),
    /// A body that is binary, or whose encoding is not UTF-8.
    NonText(Bytes),
}

impl ResponseBody {
    /// Picks the body representation from the `Content-Type` header and the bytes.
    ///
    /// A body is text when the content type is absent or textual (`text/*`,
    /// JSON, XML, JavaScript or form data), the charset is absent, UTF-8 or
    /// US-ASCII, and the bytes are valid UTF-8. Any other body is kept as raw
    /// bytes rather than guessing its encoding.
    pub fn from_bytes(content_type: Option<&str>, body: Bytes) -> Self {
        if body.is_empty() {
            return ResponseBody::Empty;
        }
        if !content_type.map_or(true, is_textual) {
            return ResponseBody::NonText(body);
        }
        match std::str::from_utf8(&body) {
            Ok(text) => ResponseBody::Text(text.to_string()),
            Err(_) => ResponseBody::NonText(body),
        }
    }

    /// The body text, for a text body.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Number of body bytes.
    pub fn len(&self) -> usize {
        match self {
            ResponseBody::Empty => 0,
            ResponseBody::Text(text) => text.len(),
            ResponseBody::NonText(bytes) => bytes.len(),
        }
    }

    /// Whether there were no body bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_textual(content_type: &str) -> bool {
    let mut params = content_type.split(';');
    let mime = params
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let textual = mime.starts_with("text/")
        || mime.ends_with("json")
        || mime.ends_with("xml")
        || mime.ends_with("javascript")
        || mime == "application/x-www-form-urlencoded";
    if !textual {
        return false;
    }

    params
        .filter_map(|param| param.split_once('='))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .all(|(_, charset)| {
            let charset = charset.trim().trim_matches('"').to_ascii_lowercase();
            charset == "utf-8" || charset == "utf8" || charset == "us-ascii"
        })
}

/// A complete response as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// Response status.
    pub status: StatusCode,
    /// Protocol version of the response.
    pub version: Version,
    /// Response headers, trailers of a chunked body appended.
    pub headers: HeaderMap,
    /// Response body.
    pub body: ResponseBody,
}

impl HttpResponse {
    /// Builds a response, classifying the body by the `Content-Type` header.
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        let body = ResponseBody::from_bytes(
            headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            body,
        );
        Self {
            status,
            version,
            headers,
            body,
        }
    }
}

impl fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?} {}", self.version, self.status)?;
        for (name, value) in self.headers.iter() {
            writeln!(f, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        match &self.body {
            ResponseBody::Empty => Ok(()),
            ResponseBody::Text(text) => write!(f, "\n{}", text),
            ResponseBody::NonText(bytes) => write!(f, "\n<{} bytes of non-text body>", bytes.len()),
        }
    }
}
