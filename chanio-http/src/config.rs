use std::time::Duration;

use chanio_codec::TlsConfig;
use chanio_transport::{RecvBufferAllocator, SocketOptions};

use crate::request::{DEFAULT_ACCEPT, DEFAULT_USER_AGENT};

/// Settings of an [`HttpClient`](crate::HttpClient).
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Options of every connection the client opens.
    pub socket: SocketOptions,
    /// `User-Agent` sent unless a request sets its own.
    pub user_agent: String,
    /// `Accept` sent unless a request sets its own.
    pub accept: String,
    /// How long to wait for a complete response once connected.
    pub response_timeout: Option<Duration>,
    /// TLS settings for `https` URLs; `None` trusts the `webpki-roots` set.
    pub tls: Option<TlsConfig>,
    /// Insert a [`LoggingHandler`](chanio_codec::LoggingHandler) after the TLS
    /// stage and after the HTTP codec.
    pub debug_handlers: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            socket: SocketOptions::new()
                .reuse_addr(true)
                .no_delay(true)
                .recv_allocator(RecvBufferAllocator::default())
                .connect_timeout(Duration::from_secs(10)),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            response_timeout: Some(Duration::from_secs(30)),
            tls: None,
            debug_handlers: false,
        }
    }
}

impl HttpClientConfig {
    /// Same as [`HttpClientConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the socket options.
    pub fn socket(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    /// Sets the default `User-Agent`.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the default `Accept`.
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    /// Sets the response timeout; `None` waits until the connection closes.
    pub fn response_timeout(mut self, response_timeout: Option<Duration>) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    /// Sets the TLS settings for `https` URLs.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Turns the debug logging stages on or off.
    pub fn debug_handlers(mut self, debug_handlers: bool) -> Self {
        self.debug_handlers = debug_handlers;
        self
    }
}
