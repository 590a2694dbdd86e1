use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use chanio::{Error, Pipeline};
use chanio_executor::{spawn_local, EventLoop, EventLoopFuture};
use chanio_transport::{ByteBuffer, SocketOptions};
use log::{debug, trace};
use tokio::net::{lookup_host, TcpSocket, TcpStream};

use crate::driver::start_connection;
use crate::{Connection, PipelineInitializer};

/// Opens outbound TCP connections on one event loop and installs a pipeline on each.
///
/// ```rust,no_run
/// use chanio_bootstrap::ClientBootstrap;
/// use chanio_executor::EventLoop;
/// use chanio_transport::{ByteBuffer, SocketOptions};
///
/// let event_loop = EventLoop::new("client").unwrap();
/// let connection = ClientBootstrap::<ByteBuffer>::new(event_loop.clone())
///     .option(SocketOptions::new().no_delay(true))
///     .pipeline(|_pipeline| Ok(()))
///     .connect("localhost", 8080)
///     .wait()
///     .unwrap();
/// connection.write(ByteBuffer::from("ping")).wait().unwrap();
/// connection.close().wait().unwrap();
/// event_loop.shutdown_gracefully().unwrap();
/// ```
pub struct ClientBootstrap<W: Send + 'static> {
    event_loop: EventLoop,
    options: SocketOptions,
    initializer: Option<PipelineInitializer<W>>,
}

impl<W: Send + 'static> ClientBootstrap<W> {
    /// Creates a bootstrap whose connections are bound to `event_loop`.
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            event_loop,
            options: SocketOptions::default(),
            initializer: None,
        }
    }

    /// Sets the socket options applied to each connection.
    pub fn option(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the callback that installs handlers into each new pipeline.
    pub fn pipeline<F>(mut self, initializer: F) -> Self
    where
        F: Fn(&Pipeline<ByteBuffer, W>) -> Result<(), Error> + Send + Sync + 'static,
    {
        let initializer: PipelineInitializer<W> = Arc::new(initializer);
        self.initializer = Some(initializer);
        self
    }

    /// Resolves `host`, connects to the first address that accepts, and
    /// starts driving the pipeline.
    pub fn connect(&self, host: &str, port: u16) -> EventLoopFuture<Connection<W>> {
        let (promise, future) = self.event_loop.make_promise();

        let host = host.to_string();
        let event_loop = self.event_loop.clone();
        let options = self.options.clone();
        let initializer = self.initializer.clone();
        let scheduled = self.event_loop.schedule(move || {
            spawn_local(async move {
                promise.complete(connect(host, port, event_loop, options, initializer).await);
            })
            .detach();
        });

        match scheduled {
            Ok(()) => future,
            Err(err) => EventLoopFuture::failed(self.event_loop.clone(), err),
        }
    }
}

async fn connect<W: Send + 'static>(
    host: String,
    port: u16,
    event_loop: EventLoop,
    options: SocketOptions,
    initializer: Option<PipelineInitializer<W>>,
) -> Result<Connection<W>, Error> {
    let registration = event_loop.register()?;

    let addrs = lookup_host((host.as_str(), port))
        .await
        .map_err(Error::Connect)?;

    let mut last_err = None;
    for addr in addrs {
        match connect_addr(addr, &options).await {
            Ok(stream) => {
                trace!("connected to {}:{} via {}", host, port, addr);
                return start_connection(
                    stream,
                    event_loop,
                    registration,
                    &options,
                    initializer.as_ref(),
                );
            }
            Err(err) => {
                debug!("connect to {} failed: {}", addr, err);
                last_err = Some(err);
            }
        }
    }

    Err(Error::Connect(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{}:{} resolved to no addresses", host, port),
        )
    })))
}

/// Creates an unconnected socket for `addr` with `options` applied.
fn client_socket(addr: SocketAddr, options: &SocketOptions) -> io::Result<TcpSocket> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(options.reuse_addr)?;
    socket.set_nodelay(options.no_delay)?;
    Ok(socket)
}

async fn connect_addr(addr: SocketAddr, options: &SocketOptions) -> io::Result<TcpStream> {
    let socket = client_socket(addr, options)?;

    match options.connect_timeout {
        Some(timeout) => tokio::time::timeout(timeout, socket.connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?,
        None => socket.connect(addr).await,
    }
}
