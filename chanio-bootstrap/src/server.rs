use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chanio::{Error, Pipeline};
use chanio_executor::{
    spawn_local, EventLoop, EventLoopFuture, EventLoopGroup, EventLoopPromise, Registration,
};
use chanio_transport::{ByteBuffer, SocketOptions};
use log::{trace, warn};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;

use crate::driver::start_connection;
use crate::PipelineInitializer;

const LISTEN_BACKLOG: u32 = 1024;

/// Accepts TCP connections on a parent loop and hands each accepted socket to
/// a loop of the child group, where its pipeline is built and driven.
pub struct ServerBootstrap<W: Send + 'static> {
    parent: EventLoop,
    children: Arc<EventLoopGroup>,
    child_options: SocketOptions,
    child_initializer: Option<PipelineInitializer<W>>,
}

impl<W: Send + 'static> ServerBootstrap<W> {
    /// Creates a bootstrap accepting on `parent` and serving on `children`.
    pub fn new(parent: EventLoop, children: Arc<EventLoopGroup>) -> Self {
        Self {
            parent,
            children,
            child_options: SocketOptions::default(),
            child_initializer: None,
        }
    }

    /// Sets the socket options of accepted connections.
    ///
    /// `reuse_addr` also applies to the listening socket.
    pub fn child_option(mut self, options: SocketOptions) -> Self {
        self.child_options = options;
        self
    }

    /// Sets the callback that installs handlers into each accepted connection's pipeline.
    pub fn child_pipeline<F>(mut self, initializer: F) -> Self
    where
        F: Fn(&Pipeline<ByteBuffer, W>) -> Result<(), Error> + Send + Sync + 'static,
    {
        let initializer: PipelineInitializer<W> = Arc::new(initializer);
        self.child_initializer = Some(initializer);
        self
    }

    /// Binds and starts accepting.
    pub fn bind(&self, addr: SocketAddr) -> EventLoopFuture<ServerChannel> {
        let (promise, future) = self.parent.make_promise();

        let parent = self.parent.clone();
        let acceptor = Acceptor {
            children: Arc::clone(&self.children),
            options: self.child_options.clone(),
            initializer: self.child_initializer.clone(),
        };
        let scheduled = self.parent.schedule(move || {
            spawn_local(async move {
                promise.complete(acceptor.bind(addr, parent).await);
            })
            .detach();
        });

        match scheduled {
            Ok(()) => future,
            Err(err) => EventLoopFuture::failed(self.parent.clone(), err),
        }
    }
}

struct Acceptor<W: Send + 'static> {
    children: Arc<EventLoopGroup>,
    options: SocketOptions,
    initializer: Option<PipelineInitializer<W>>,
}

impl<W: Send + 'static> Acceptor<W> {
    async fn bind(self, addr: SocketAddr, parent: EventLoop) -> Result<ServerChannel, Error> {
        let registration = parent.register()?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(self.options.reuse_addr)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;
        trace!("listening on {}", local_addr);

        let (close_tx, close_rx) = oneshot::channel();
        let channel = ServerChannel {
            local_addr,
            event_loop: parent,
            shared: Arc::new(ServerShared {
                close_tx: Mutex::new(Some(close_tx)),
                listeners: Mutex::new(Some(vec![])),
            }),
        };

        let shared = Arc::clone(&channel.shared);
        spawn_local(async move {
            self.accept_loop(listener, registration, close_rx).await;
            shared.set_closed();
        })
        .detach();

        Ok(channel)
    }

    async fn accept_loop(
        self,
        listener: TcpListener,
        mut registration: Registration,
        mut close_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = registration.closed() => {
                    trace!("listener exit loop");
                    break;
                }
                _ = &mut close_rx => {
                    trace!("listener closed");
                    break;
                }
                res = listener.accept() => {
                    match res {
                        Ok((stream, peer_addr)) => {
                            trace!("accepted {}", peer_addr);
                            self.dispatch(stream);
                        }
                        Err(err) => {
                            warn!("listener accept error {}", err);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Moves an accepted socket to the next child loop and starts it there.
    fn dispatch(&self, stream: TcpStream) {
        if let Err(err) = stream.set_nodelay(self.options.no_delay) {
            warn!("failed to set TCP_NODELAY on accepted socket: {}", err);
        }
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(err) => {
                warn!("failed to detach accepted socket: {}", err);
                return;
            }
        };

        let child = self.children.next();
        let event_loop = child.clone();
        let options = self.options.clone();
        let initializer = self.initializer.clone();
        let scheduled = child.schedule(move || {
            let started = event_loop.register().and_then(|registration| {
                let stream = TcpStream::from_std(stream)?;
                start_connection::<W>(
                    stream,
                    event_loop,
                    registration,
                    &options,
                    initializer.as_ref(),
                )
            });
            if let Err(err) = started {
                warn!("failed to start accepted connection: {}", err);
            }
        });
        if let Err(err) = scheduled {
            warn!("{} rejected accepted connection: {}", child.name(), err);
        }
    }
}

struct ServerShared {
    close_tx: Mutex<Option<oneshot::Sender<()>>>,
    listeners: Mutex<Option<Vec<EventLoopPromise<()>>>>,
}

impl ServerShared {
    fn set_closed(&self) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        for listener in listeners.into_iter().flatten() {
            listener.succeed(());
        }
    }
}

/// A bound listening socket.
///
/// Closing it stops accepting; connections already accepted keep running on
/// their child loops.
#[derive(Clone)]
pub struct ServerChannel {
    local_addr: SocketAddr,
    event_loop: EventLoop,
    shared: Arc<ServerShared>,
}

impl ServerChannel {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting. The future completes once the listener is closed.
    pub fn close(&self) -> EventLoopFuture<()> {
        let close_tx = self
            .shared
            .close_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(close_tx) = close_tx {
            let _ = close_tx.send(());
        }
        self.closed()
    }

    /// A future that completes once the listener is closed.
    pub fn closed(&self) -> EventLoopFuture<()> {
        let (promise, future) = self.event_loop.make_promise();
        match self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_mut()
        {
            Some(listeners) => listeners.push(promise),
            None => promise.succeed(()),
        }
        future
    }
}
