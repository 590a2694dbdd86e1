//! Error kinds shared by every chanio crate.

use std::io;
use thiserror::Error;

/// Boxed error carried by [`Handler::handle_error`](crate::Handler::handle_error).
///
/// It is `Send + Sync` so that whatever the terminal handler receives can be
/// handed over to a caller on another thread.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by pipelines, connections, event loops and the stages built on them.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level connect failure.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// The TLS handshake did not complete.
    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),

    /// A TLS record error after the handshake completed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Malformed protocol framing on the inbound side.
    #[error("malformed message: {0}")]
    CodecDecode(String),

    /// A handler with the same name is already installed.
    #[error("handler name \"{0}\" already exists in pipeline")]
    DuplicateName(String),

    /// No handler with the given name is installed.
    #[error("no such handler \"{0}\" in pipeline")]
    NotFound(String),

    /// The name belongs to the pipeline's own tail stage.
    #[error("handler name \"{0}\" is reserved")]
    ReservedName(String),

    /// The connection closed before the exchange finished.
    #[error("connection closed before the exchange was complete")]
    PrematureClose,

    /// An operation did not finish in time.
    #[error("operation timed out")]
    Timeout,

    /// Any other I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The connection is already closed.
    #[error("connection is closed")]
    Closed,

    /// The event loop no longer accepts work.
    #[error("event loop is shut down")]
    EventLoopShutdown,

    /// The producing side went away without delivering an outcome.
    #[error("promise dropped before it was completed")]
    BrokenPromise,

    /// A request target could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Errors that do not fit any other kind.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Recovers a typed [`Error`] from a boxed pipeline error.
    ///
    /// chanio errors come back unchanged, bare `io::Error`s become [`Error::Io`],
    /// and anything else is kept as [`Error::Other`] with its message.
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => *err,
            Err(err) => match err.downcast::<io::Error>() {
                Ok(err) => Error::Io(*err),
                Err(err) => Error::Other(err.to_string()),
            },
        }
    }

    /// Whether this error means the peer or the transport went away.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed | Error::PrematureClose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_boxed_keeps_chanio_kind() {
        let boxed: BoxError = Box::new(Error::TlsHandshake("bad certificate".into()));
        assert!(matches!(
            Error::from_boxed(boxed),
            Error::TlsHandshake(reason) if reason == "bad certificate"
        ));
    }

    #[test]
    fn from_boxed_maps_io_and_foreign_errors() {
        let boxed: BoxError = Box::new(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(matches!(Error::from_boxed(boxed), Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));

        let boxed: BoxError = "something odd".into();
        assert!(matches!(Error::from_boxed(boxed), Error::Other(msg) if msg == "something odd"));
    }
}
