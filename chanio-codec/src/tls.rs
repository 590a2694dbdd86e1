//! Client-side TLS stage built on `rustls`.
//!
//! [`TlsHandler`] sits directly above the socket. Bytes from the socket feed
//! the TLS session and come out as plaintext to the stages above; plaintext
//! from above is encrypted on the way down.
//!
//! ```text
//!                Handshaking ──────────────> Established
//!                    │    handshake done          │
//!  handshake error / │                            │ close / record error
//!  eof               ▼                            ▼
//!                  Closed <──────────────────────-┘
//! ```
//!
//! Plaintext written before the handshake completes is held back and sent, in
//! order, right after it.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use chanio::{Context, Error, Handler};
use chanio_transport::ByteBuffer;
use log::{debug, trace, warn};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

const READ_CHUNK: usize = 16 * 1024;

/// TLS settings shared by every connection of a client.
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Wraps an existing `rustls` client configuration.
    pub fn new(client_config: Arc<ClientConfig>) -> Self {
        Self { client_config }
    }

    /// Trusts the Mozilla root certificates shipped in `webpki-roots`.
    pub fn with_webpki_roots() -> Result<Self, Error> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots)
    }

    /// Trusts exactly the certificates in `roots`.
    pub fn with_roots(roots: RootCertStore) -> Result<Self, Error> {
        let client_config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|err| Error::Tls(err.to_string()))?
                .with_root_certificates(roots)
                .with_no_client_auth();
        Ok(Self::new(Arc::new(client_config)))
    }

    /// The underlying `rustls` configuration.
    pub fn client_config(&self) -> &Arc<ClientConfig> {
        &self.client_config
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("alpn_protocols", &self.client_config.alpn_protocols)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsState {
    Handshaking,
    Established,
    Closed,
}

/// TLS client stage; `ByteBuffer` in both directions.
pub struct TlsHandler {
    conn: ClientConnection,
    state: TlsState,
    pending_plaintext: VecDeque<ByteBuffer>,
}

impl TlsHandler {
    /// Starts a client session that validates the peer as `server_name`, also
    /// sent as SNI.
    pub fn new(config: &TlsConfig, server_name: &str) -> Result<Self, Error> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|err| Error::TlsHandshake(format!("{}: {}", server_name, err)))?;
        let mut conn = ClientConnection::new(Arc::clone(&config.client_config), server_name)
            .map_err(|err| Error::TlsHandshake(err.to_string()))?;
        conn.set_buffer_limit(None);

        Ok(Self {
            conn,
            state: TlsState::Handshaking,
            pending_plaintext: VecDeque::new(),
        })
    }

    /// Whether the handshake has completed and the session is still open.
    pub fn is_established(&self) -> bool {
        self.state == TlsState::Established
    }

    fn fail(
        &mut self,
        ctx: &Context<ByteBuffer, ByteBuffer, ByteBuffer, ByteBuffer>,
        reason: String,
    ) {
        let err = if self.state == TlsState::Handshaking {
            Error::TlsHandshake(reason)
        } else {
            Error::Tls(reason)
        };
        warn!("{}", err);
        self.state = TlsState::Closed;
        self.pending_plaintext.clear();
        ctx.fire_handle_error(Box::new(err));
        ctx.request_close();
    }

    /// Moves everything decrypted so far into one buffer.
    fn take_plaintext(&mut self) -> io::Result<Option<ByteBuffer>> {
        let mut plaintext = ByteBuffer::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.conn.reader().read(&mut chunk) {
                Ok(0) => {
                    trace!("tls peer sent close_notify");
                    break;
                }
                Ok(n) => plaintext.write_bytes(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(if plaintext.is_empty() {
            None
        } else {
            Some(plaintext)
        })
    }

    fn encrypt(&mut self, plaintext: &ByteBuffer) -> io::Result<()> {
        self.conn.writer().write_all(plaintext.readable())
    }
}

impl Handler for TlsHandler {
    type Rin = ByteBuffer;
    type Rout = ByteBuffer;
    type Win = ByteBuffer;
    type Wout = ByteBuffer;

    fn name(&self) -> &str {
        "TlsHandler"
    }

    fn handle_read(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        msg: Self::Rin,
    ) {
        if self.state == TlsState::Closed {
            trace!("dropping {} bytes on a closed tls session", msg.readable_bytes());
            return;
        }

        let mut ciphertext = msg.readable();
        while !ciphertext.is_empty() {
            match self.conn.read_tls(&mut ciphertext) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    self.fail(ctx, err.to_string());
                    return;
                }
            }
            if let Err(err) = self.conn.process_new_packets() {
                self.fail(ctx, err.to_string());
                return;
            }

            if self.state == TlsState::Handshaking && !self.conn.is_handshaking() {
                debug!(
                    "tls handshake completed, {:?} {:?}",
                    self.conn.protocol_version(),
                    self.conn.negotiated_cipher_suite().map(|suite| suite.suite())
                );
                self.state = TlsState::Established;
            }

            match self.take_plaintext() {
                Ok(Some(plaintext)) => ctx.fire_handle_read(plaintext),
                Ok(None) => {}
                Err(err) => {
                    self.fail(ctx, err.to_string());
                    return;
                }
            }
        }
    }

    fn poll_write(
        &mut self,
        ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
    ) -> Option<Self::Wout> {
        match self.state {
            TlsState::Handshaking => {
                while let Some(msg) = ctx.fire_poll_write() {
                    trace!("holding {} plaintext bytes until handshake", msg.readable_bytes());
                    self.pending_plaintext.push_back(msg);
                }
            }
            TlsState::Established => {
                let mut res = Ok(());
                while let Some(msg) = self.pending_plaintext.pop_front() {
                    res = res.and_then(|_| self.encrypt(&msg));
                }
                while let Some(msg) = ctx.fire_poll_write() {
                    res = res.and_then(|_| self.encrypt(&msg));
                }
                if let Err(err) = res {
                    self.fail(ctx, err.to_string());
                }
            }
            TlsState::Closed => {
                while let Some(msg) = ctx.fire_poll_write() {
                    debug!("dropping {} bytes written after tls close", msg.readable_bytes());
                }
            }
        }

        let mut ciphertext = Vec::new();
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut ciphertext) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!("tls write error {}", err);
                    break;
                }
            }
        }
        if ciphertext.is_empty() {
            None
        } else {
            Some(ByteBuffer::from(ciphertext))
        }
    }

    fn has_pending_write(&self) -> bool {
        !self.pending_plaintext.is_empty() || self.conn.wants_write()
    }

    fn handle_eof(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        if self.state == TlsState::Handshaking {
            self.fail(ctx, "connection closed during handshake".to_string());
        }
        ctx.fire_handle_eof();
    }

    fn handle_close(&mut self, ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>) {
        if self.state != TlsState::Closed {
            trace!("sending tls close_notify");
            self.conn.send_close_notify();
            self.state = TlsState::Closed;
        }
        ctx.fire_handle_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanio::{BoxError, InboundPipeline, OutboundPipeline, Pipeline};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::{ServerConfig, ServerConnection};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Plaintext {
        reads: Rc<RefCell<Vec<String>>>,
        errors: Rc<RefCell<Vec<BoxError>>>,
    }

    impl Handler for Plaintext {
        type Rin = ByteBuffer;
        type Rout = ByteBuffer;
        type Win = ByteBuffer;
        type Wout = ByteBuffer;

        fn name(&self) -> &str {
            "Plaintext"
        }

        fn handle_read(
            &mut self,
            _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
            msg: Self::Rin,
        ) {
            self.reads
                .borrow_mut()
                .push(String::from_utf8_lossy(msg.readable()).to_string());
        }

        fn poll_write(
            &mut self,
            ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
        ) -> Option<Self::Wout> {
            ctx.fire_poll_write()
        }

        fn handle_error(
            &mut self,
            _ctx: &Context<Self::Rin, Self::Rout, Self::Win, Self::Wout>,
            err: BoxError,
        ) {
            self.errors.borrow_mut().push(err);
        }
    }

    fn provider() -> Arc<rustls::crypto::CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    fn certificate() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        (certified.cert.der().clone(), key)
    }

    fn server(cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> ServerConnection {
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();
        ServerConnection::new(Arc::new(config)).unwrap()
    }

    fn client_trusting(cert: CertificateDer<'static>) -> TlsConfig {
        let mut roots = RootCertStore::empty();
        roots.add(cert).unwrap();
        TlsConfig::with_roots(roots).unwrap()
    }

    fn pipeline(
        tls: TlsHandler,
        plaintext: Plaintext,
    ) -> Rc<Pipeline<ByteBuffer, ByteBuffer>> {
        let pipeline: Pipeline<ByteBuffer, ByteBuffer> = Pipeline::new();
        pipeline.add_last(tls).unwrap();
        pipeline.add_last(plaintext).unwrap();
        pipeline.finalize()
    }

    /// Moves records between the pipeline and the server until both are idle.
    fn shuttle(pipeline: &Pipeline<ByteBuffer, ByteBuffer>, server: &mut ServerConnection) {
        loop {
            let mut progressed = false;
            while let Some(records) = pipeline.poll_write() {
                let mut records = records.readable();
                while !records.is_empty() {
                    server.read_tls(&mut records).unwrap();
                }
                if server.process_new_packets().is_err() {
                    return;
                }
                progressed = true;
            }

            let mut records = Vec::new();
            while server.wants_write() {
                server.write_tls(&mut records).unwrap();
            }
            if !records.is_empty() {
                pipeline.handle_read(ByteBuffer::from(records));
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    fn server_plaintext(server: &mut ServerConnection) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match server.reader().read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(_) => break,
            }
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_plaintext_waits_for_handshake() {
        let (cert, key) = certificate();
        let mut server = server(cert.clone(), key);
        let config = client_trusting(cert);

        let plaintext = Plaintext::default();
        let reads = Rc::clone(&plaintext.reads);
        let errors = Rc::clone(&plaintext.errors);
        let pipeline = pipeline(TlsHandler::new(&config, "localhost").unwrap(), plaintext);

        pipeline.transport_active();
        pipeline.write(ByteBuffer::from("GET / HTTP/1.1\r\n"));
        pipeline.write(ByteBuffer::from("\r\n"));
        assert!(pipeline.has_pending_write());

        shuttle(&pipeline, &mut server);
        assert!(!server.is_handshaking());
        assert!(!pipeline.has_pending_write());
        assert_eq!(server_plaintext(&mut server), "GET / HTTP/1.1\r\n\r\n");

        server.writer().write_all(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        shuttle(&pipeline, &mut server);
        assert_eq!(*reads.borrow(), vec!["HTTP/1.1 200 OK\r\n\r\n".to_string()]);
        assert!(errors.borrow().is_empty());
        assert!(!pipeline.take_close_request());
    }

    #[test]
    fn test_untrusted_certificate_fails_handshake() {
        let (cert, key) = certificate();
        let (other_cert, _) = certificate();
        let mut server = server(cert, key);
        let config = client_trusting(other_cert);

        let plaintext = Plaintext::default();
        let errors = Rc::clone(&plaintext.errors);
        let pipeline = pipeline(TlsHandler::new(&config, "localhost").unwrap(), plaintext);

        pipeline.transport_active();
        pipeline.write(ByteBuffer::from("never sent"));
        shuttle(&pipeline, &mut server);

        let errors = errors.borrow();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].downcast_ref::<Error>(),
            Some(Error::TlsHandshake(_))
        ));
        assert!(pipeline.take_close_request());
        assert!(server_plaintext(&mut server).is_empty());
    }

    #[test]
    fn test_eof_during_handshake() {
        let (cert, _) = certificate();
        let config = client_trusting(cert);

        let plaintext = Plaintext::default();
        let errors = Rc::clone(&plaintext.errors);
        let pipeline = pipeline(TlsHandler::new(&config, "localhost").unwrap(), plaintext);

        pipeline.transport_active();
        assert!(pipeline.poll_write().is_some());
        pipeline.handle_eof();

        assert!(matches!(
            errors.borrow()[0].downcast_ref::<Error>(),
            Some(Error::TlsHandshake(_))
        ));
        assert!(pipeline.take_close_request());
    }

    #[test]
    fn test_close_sends_close_notify() {
        let (cert, key) = certificate();
        let mut server = server(cert.clone(), key);
        let config = client_trusting(cert);

        let pipeline = pipeline(
            TlsHandler::new(&config, "localhost").unwrap(),
            Plaintext::default(),
        );
        pipeline.transport_active();
        shuttle(&pipeline, &mut server);

        pipeline.handle_close();
        let records = pipeline.poll_write().unwrap();
        server.read_tls(&mut records.readable()).unwrap();
        let state = server.process_new_packets().unwrap();
        assert!(state.peer_has_closed());
    }

    #[test]
    fn test_invalid_server_name() {
        let (cert, _) = certificate();
        let config = client_trusting(cert);
        assert!(matches!(
            TlsHandler::new(&config, "not a hostname"),
            Err(Error::TlsHandshake(_))
        ));
    }
}
