use std::fmt;
use std::str::FromStr;

use chanio::Error;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Bytes left as-is in a rendered query: ASCII alphanumerics and `-._~`.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// URL scheme of a [`GetUrl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP, port 80 by default.
    Http,
    /// HTTP over TLS, port 443 by default.
    Https,
}

impl Scheme {
    /// The port used when a URL names none.
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// `http` or `https`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a request: scheme, host, optional port, path segments and an
/// optional raw query.
///
/// The query is kept unencoded and percent-encoded on render; the path
/// segments are joined with `/` as given.
///
/// ```rust
/// use chanio_http::{GetUrl, Scheme};
///
/// let url = GetUrl::new(Scheme::Http, "localhost")
///     .with_port(8080)
///     .with_path(["foo"])
///     .with_query("time_zone=Asia/Tokyo");
/// assert_eq!(url.to_string(), "http://localhost:8080/foo?time_zone%3DAsia%2FTokyo");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUrl {
    /// URL scheme.
    pub scheme: Scheme,
    /// Host name or address literal.
    pub host: String,
    /// Explicit port, if the URL names one.
    pub port: Option<u16>,
    /// Path segments, without separators.
    pub path: Vec<String>,
    /// Raw, unencoded query.
    pub query: Option<String>,
}

impl GetUrl {
    /// Creates a URL for the root path of `host`.
    pub fn new(scheme: Scheme, host: impl Into<String>) -> Self {
        Self {
            scheme,
            host: host.into(),
            port: None,
            path: vec![],
            query: None,
        }
    }

    /// Sets an explicit port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the path segments.
    pub fn with_path<I, S>(mut self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = segments.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the raw query.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// The explicit port, or the scheme's default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// `/` followed by the path segments joined by `/`.
    pub fn path_string(&self) -> String {
        format!("/{}", self.path.join("/"))
    }

    /// The query with every byte except ASCII alphanumerics and `-._~`
    /// percent-encoded.
    pub fn encoded_query(&self) -> Option<String> {
        self.query
            .as_deref()
            .map(|query| utf8_percent_encode(query, QUERY).to_string())
    }

    /// Origin-form request target: path plus encoded query.
    pub fn request_target(&self) -> String {
        match self.encoded_query() {
            Some(query) => format!("{}?{}", self.path_string(), query),
            None => self.path_string(),
        }
    }

    /// `scheme://host[:port]/path[?query]`.
    pub fn url_string(&self) -> String {
        self.to_string()
    }

    /// The host as handed to name resolution and TLS, without IPv6 brackets.
    pub fn socket_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Value of the `Host` header: the host, plus the port when it is not
    /// the scheme's default.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) if port != self.scheme.default_port() => format!("{}:{}", self.host, port),
            _ => self.host.clone(),
        }
    }
}

impl fmt::Display for GetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        f.write_str(&self.request_target())
    }
}

impl FromStr for GetUrl {
    type Err = Error;

    /// Parses `http[s]://host[:port][/path][?query]`.
    ///
    /// The query is percent-decoded, so rendering the result encodes it again.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidUrl(format!("{}: {}", s, reason));

        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(invalid("unsupported scheme")),
        };

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (
                rest,
                Some(percent_decode_str(query).decode_utf8_lossy().to_string()),
            ),
            None => (rest, None),
        };
        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            // an IPv6 literal without a port
            Some((_, tail)) if tail.ends_with(']') => (authority, None),
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                (host, Some(port))
            }
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
            query,
        })
    }
}
