use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chanio::{Error, Pipeline};
use chanio_bootstrap::ClientBootstrap;
use chanio_codec::{
    HttpClientCodec, HttpClientRequestPart, HttpClientResponsePart, LoggingHandler, TlsConfig,
    TlsHandler,
};
use chanio_executor::{sync_gate, EventLoop, EventLoopFuture, GateSignal};
use chanio_transport::ByteBuffer;
use log::{debug, trace};

use crate::config::HttpClientConfig;
use crate::handler::HttpResponseHandler;
use crate::request::HttpRequest;
use crate::response::HttpResponse;
use crate::url::{GetUrl, Scheme};

type SharedSignal = Arc<Mutex<Option<GateSignal<HttpResponse>>>>;

/// Blocking HTTP/1.1 client.
///
/// Each request gets its own connection on the client's event loop; the
/// calling thread blocks until the response or the failure is known.
///
/// ```rust,no_run
/// use chanio_http::{GetUrl, HttpClient, HttpClientConfig};
///
/// let client = HttpClient::new(HttpClientConfig::default()).unwrap();
/// let url: GetUrl = "https://httpbin.org/status/200".parse().unwrap();
/// let response = client.get(&url).unwrap();
/// println!("{}", response.status);
/// client.shutdown().unwrap();
/// ```
pub struct HttpClient {
    event_loop: EventLoop,
    config: HttpClientConfig,
    tls: TlsConfig,
    shut_down: AtomicBool,
}

impl HttpClient {
    /// Starts the client's event loop.
    pub fn new(config: HttpClientConfig) -> Result<Self, Error> {
        let tls = match &config.tls {
            Some(tls) => tls.clone(),
            None => TlsConfig::with_webpki_roots()?,
        };
        Ok(Self {
            event_loop: EventLoop::new("chanio-http")?,
            config,
            tls,
            shut_down: AtomicBool::new(false),
        })
    }

    /// The loop every connection of this client runs on.
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// Sends a `GET` for `url`.
    pub fn get(&self, url: &GetUrl) -> Result<HttpResponse, Error> {
        self.send(HttpRequest::get(url.clone()))
    }

    /// Sends `request` over a new connection and waits for the response.
    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        let request = request.defaults(&self.config.user_agent, &self.config.accept);
        let url = request.url().clone();
        trace!("{} {}", request.method(), url);

        let (signal, gate) = sync_gate();
        let signal: SharedSignal = Arc::new(Mutex::new(Some(signal)));

        let parts = request.parts();
        let written = self
            .bootstrap(&url, Arc::clone(&signal))
            .connect(url.socket_host(), url.effective_port())
            .and_then(move |connection| {
                let mut flushed = EventLoopFuture::succeeded(connection.event_loop().clone(), ());
                for part in parts {
                    flushed = connection.write(part);
                }
                flushed.map(move |()| connection)
            });

        let connection = match written.wait() {
            Ok(connection) => Some(connection),
            Err(err) => {
                debug!("request to {} failed: {}", url, err);
                if let Some(signal) = take_signal(&signal) {
                    signal.release(Err(err));
                }
                None
            }
        };

        let outcome = gate.wait();
        if let Some(connection) = connection {
            if let Err(err) = connection.close().wait() {
                debug!("closing connection {} failed: {}", connection.id(), err);
            }
        }
        outcome
    }

    /// Stops the event loop and joins its thread. Later calls do nothing.
    pub fn shutdown(&self) -> Result<(), Error> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.event_loop.shutdown_gracefully()
    }

    fn bootstrap(&self, url: &GetUrl, signal: SharedSignal) -> ClientBootstrap<HttpClientRequestPart> {
        let tls = match url.scheme {
            Scheme::Https => Some(self.tls.clone()),
            Scheme::Http => None,
        };
        let server_name = url.socket_host().to_string();
        let response_timeout = self.config.response_timeout;
        let debug_handlers = self.config.debug_handlers;

        ClientBootstrap::new(self.event_loop.clone())
            .option(self.config.socket.clone())
            .pipeline(move |pipeline: &Pipeline<ByteBuffer, HttpClientRequestPart>| {
                if let Some(tls) = &tls {
                    pipeline.add_last(TlsHandler::new(tls, &server_name)?)?;
                    if debug_handlers {
                        pipeline.add_last(LoggingHandler::<ByteBuffer, ByteBuffer>::new("tls"))?;
                    }
                }
                pipeline.add_last(HttpClientCodec::new())?;
                if debug_handlers {
                    pipeline.add_last(LoggingHandler::<
                        HttpClientResponsePart,
                        HttpClientRequestPart,
                    >::new("http codec"))?;
                }

                let signal = take_signal(&signal)
                    .ok_or_else(|| Error::Other("response already claimed".to_string()))?;
                let mut handler = HttpResponseHandler::new(signal);
                if let Some(timeout) = response_timeout {
                    handler = handler.with_timeout(timeout);
                }
                pipeline.add_last(handler)?;
                Ok(())
            })
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!("http client shutdown failed: {}", err);
        }
    }
}

fn take_signal(signal: &SharedSignal) -> Option<GateSignal<HttpResponse>> {
    signal
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}
