use bytes::Bytes;
use chanio::Error;
use chanio_codec::{HttpClientRequestPart, HttpPart, HttpRequestHead};
use chanio_transport::ByteBuffer;
use http::header::{ACCEPT, CONTENT_LENGTH, HOST, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::url::GetUrl;

/// `User-Agent` sent when the caller does not set one.
pub const DEFAULT_USER_AGENT: &str = concat!("chanio/", env!("CARGO_PKG_VERSION"));

/// `Accept` sent when the caller does not set one.
pub const DEFAULT_ACCEPT: &str = "*/*";

/// An outbound request: method, target, headers and an optional body.
///
/// ```rust
/// use chanio_http::{GetUrl, HttpRequest};
///
/// let url: GetUrl = "http://localhost:8080/foo".parse().unwrap();
/// let head = HttpRequest::get(url).header("accept", "application/json").unwrap().head();
/// assert_eq!(head.target, "/foo");
/// assert_eq!(head.headers["host"], "localhost:8080");
/// assert_eq!(head.headers["accept"], "application/json");
/// ```
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: GetUrl,
    headers: HeaderMap,
    body: Option<Bytes>,
    user_agent: String,
    accept: String,
}

impl HttpRequest {
    /// Creates a request with no extra headers and no body.
    pub fn new(method: Method, url: GetUrl) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
        }
    }

    /// Creates a `GET` request.
    pub fn get(url: GetUrl) -> Self {
        Self::new(Method::GET, url)
    }

    /// Adds a header. Headers set here replace the defaults of the same name.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, Error> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| Error::Other(format!("invalid header name {:?}: {}", name, err)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| Error::Other(format!("invalid header value {:?}: {}", value, err)))?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Replaces the default `User-Agent` and `Accept` values.
    pub(crate) fn defaults(mut self, user_agent: &str, accept: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self.accept = accept.to_string();
        self
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target.
    pub fn url(&self) -> &GetUrl {
        &self.url
    }

    /// The request head with default headers filled in: `Host`, `User-Agent`,
    /// `Accept`, and `Content-Length` when there is a body.
    pub fn head(&self) -> HttpRequestHead {
        let mut head = HttpRequestHead::new(self.method.clone(), self.url.request_target());

        let defaults = [
            (HOST, HeaderValue::from_str(&self.url.host_header())),
            (USER_AGENT, HeaderValue::from_str(&self.user_agent)),
            (ACCEPT, HeaderValue::from_str(&self.accept)),
        ];
        for (name, value) in defaults {
            match value {
                Ok(value) => {
                    head.headers.insert(name, value);
                }
                Err(err) => log::warn!("skipping default {} header: {}", name, err),
            }
        }
        if let Some(body) = &self.body {
            head.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        let mut overridden = None;
        for (name, value) in self.headers.iter() {
            if overridden.as_ref() != Some(name) {
                head.headers.remove(name);
                overridden = Some(name.clone());
            }
            head.headers.append(name.clone(), value.clone());
        }
        head
    }

    /// The parts to write: `Head`, `Body` if there is one, then `End`.
    pub fn parts(&self) -> Vec<HttpClientRequestPart> {
        let mut parts = vec![HttpPart::Head(self.head())];
        if let Some(body) = &self.body {
            if !body.is_empty() {
                parts.push(HttpPart::Body(ByteBuffer::from(body.clone())));
            }
        }
        parts.push(HttpPart::End(None));
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::Scheme;

    #[test]
    fn test_default_headers() {
        let url = GetUrl::new(Scheme::Http, "localhost")
            .with_port(8080)
            .with_path(["foo"])
            .with_query("time_zone=Asia/Tokyo");
        let head = HttpRequest::get(url).head();

        assert_eq!(head.method, Method::GET);
        assert_eq!(head.target, "/foo?time_zone%3DAsia%2FTokyo");
        assert_eq!(head.headers[HOST], "localhost:8080");
        assert_eq!(head.headers[USER_AGENT], DEFAULT_USER_AGENT);
        assert_eq!(head.headers[ACCEPT], "*/*");
        assert!(!head.headers.contains_key(CONTENT_LENGTH));
    }

    #[test]
    fn test_caller_headers_override_defaults() {
        let url = GetUrl::new(Scheme::Https, "example.com");
        let head = HttpRequest::get(url)
            .header("User-Agent", "custom-agent/2.1")
            .unwrap()
            .header("x-trace", "a")
            .unwrap()
            .header("x-trace", "b")
            .unwrap()
            .head();

        assert_eq!(head.headers[HOST], "example.com");
        assert_eq!(head.headers[USER_AGENT], "custom-agent/2.1");
        assert_eq!(
            head.headers.get_all("x-trace").iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_body_parts() {
        let url = GetUrl::new(Scheme::Http, "localhost").with_path(["items"]);
        let parts = HttpRequest::new(Method::POST, url)
            .body("payload")
            .parts();

        assert_eq!(parts.len(), 3);
        match &parts[0] {
            HttpPart::Head(head) => assert_eq!(head.headers[CONTENT_LENGTH], "7"),
            part => panic!("expected head, got {:?}", part),
        }
        assert_eq!(parts[1], HttpPart::Body(ByteBuffer::from("payload")));
        assert_eq!(parts[2], HttpPart::End(None));
    }

    #[test]
    fn test_invalid_header() {
        let url = GetUrl::new(Scheme::Http, "localhost");
        assert!(HttpRequest::get(url.clone()).header("bad name", "x").is_err());
        assert!(HttpRequest::get(url).header("x-ok", "bad\nvalue").is_err());
    }
}
