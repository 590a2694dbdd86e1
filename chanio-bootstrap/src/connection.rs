use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chanio::{Error, Pipeline};
use chanio_executor::{EventLoop, EventLoopFuture, EventLoopPromise};
use chanio_transport::ByteBuffer;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Work handed from a [`Connection`] handle to its driver.
pub(crate) enum Command<W: Send + 'static> {
    Write(W, EventLoopPromise<()>),
    Close(EventLoopPromise<()>),
    Modify(ModifyFn<W>, EventLoopPromise<()>),
}

pub(crate) type ModifyFn<W> =
    Box<dyn FnOnce(&Pipeline<ByteBuffer, W>) -> Result<(), Error> + Send>;

pub(crate) struct ConnectionInner<W: Send + 'static> {
    id: u64,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    event_loop: EventLoop,
    commands: mpsc::UnboundedSender<Command<W>>,
    open: AtomicBool,
    close_listeners: Mutex<Option<Vec<EventLoopPromise<()>>>>,
}

impl<W: Send + 'static> ConnectionInner<W> {
    pub(crate) fn new(
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        event_loop: EventLoop,
        commands: mpsc::UnboundedSender<Command<W>>,
    ) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            local_addr,
            peer_addr,
            event_loop,
            commands,
            open: AtomicBool::new(true),
            close_listeners: Mutex::new(Some(vec![])),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn set_closing(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Marks the connection fully closed and completes every `closed()` future.
    pub(crate) fn set_closed(&self) {
        self.set_closing();
        let listeners = self.listeners().take();
        for listener in listeners.into_iter().flatten() {
            listener.succeed(());
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Option<Vec<EventLoopPromise<()>>>> {
        self.close_listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to one live TCP connection and its pipeline.
///
/// The handle is `Send + Clone`: any thread may write to or close the
/// connection. The pipeline itself stays on the connection's event loop, and
/// every request made through the handle is carried out there.
pub struct Connection<W: Send + 'static> {
    inner: Arc<ConnectionInner<W>>,
}

impl<W: Send + 'static> Clone for Connection<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Send + 'static> Connection<W> {
    pub(crate) fn from_inner(inner: Arc<ConnectionInner<W>>) -> Self {
        Self { inner }
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Remote socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// The loop all of this connection's callbacks run on.
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    /// Whether the connection still accepts writes.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Writes `msg` through the pipeline, tail to head.
    ///
    /// The returned future completes once the resulting bytes are written and
    /// flushed to the socket and no stage holds back outbound data. It fails
    /// with [`Error::Closed`] if the connection closes first.
    pub fn write(&self, msg: W) -> EventLoopFuture<()> {
        if !self.is_open() {
            return EventLoopFuture::failed(self.inner.event_loop.clone(), Error::Closed);
        }
        let (promise, future) = self.inner.event_loop.make_promise();
        if let Err(mpsc::error::SendError(command)) =
            self.inner.commands.send(Command::Write(msg, promise))
        {
            if let Command::Write(_, promise) = command {
                promise.fail(Error::Closed);
            }
        }
        future
    }

    /// Closes the connection. Closing an already closed connection succeeds immediately.
    pub fn close(&self) -> EventLoopFuture<()> {
        let (promise, future) = self.inner.event_loop.make_promise();
        if !self.is_open() {
            promise.succeed(());
            return future;
        }
        if let Err(mpsc::error::SendError(command)) =
            self.inner.commands.send(Command::Close(promise))
        {
            if let Command::Close(promise) = command {
                promise.succeed(());
            }
        }
        future
    }

    /// A future that completes once the connection is fully closed.
    pub fn closed(&self) -> EventLoopFuture<()> {
        let (promise, future) = self.inner.event_loop.make_promise();
        match self.inner.listeners().as_mut() {
            Some(listeners) => listeners.push(promise),
            None => promise.succeed(()),
        }
        future
    }

    /// Runs `f` against the pipeline on the loop thread, between two event dispatches.
    ///
    /// Fails with [`Error::Closed`] if the connection closes before `f` runs.
    pub fn modify_pipeline<F>(&self, f: F) -> EventLoopFuture<()>
    where
        F: FnOnce(&Pipeline<ByteBuffer, W>) -> Result<(), Error> + Send + 'static,
    {
        if !self.is_open() {
            return EventLoopFuture::failed(self.inner.event_loop.clone(), Error::Closed);
        }
        let (promise, future) = self.inner.event_loop.make_promise();
        if let Err(mpsc::error::SendError(command)) =
            self.inner.commands.send(Command::Modify(Box::new(f), promise))
        {
            if let Command::Modify(_, promise) = command {
                promise.fail(Error::Closed);
            }
        }
        future
    }
}

impl<W: Send + 'static> fmt::Debug for Connection<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("local_addr", &self.inner.local_addr)
            .field("peer_addr", &self.inner.peer_addr)
            .field("open", &self.is_open())
            .finish()
    }
}
