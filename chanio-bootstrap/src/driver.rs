use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chanio::{Error, InboundPipeline, OutboundPipeline, Pipeline};
use chanio_executor::{spawn_local, EventLoop, EventLoopPromise, Registration};
use chanio_transport::{ByteBuffer, SocketOptions};
use log::{debug, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};

use crate::connection::{Command, Connection, ConnectionInner};
use crate::PipelineInitializer;

const DEFAULT_TIMEOUT_DURATION: Duration = Duration::from_secs(86400); // 1 day duration

/// Builds the pipeline for a freshly connected socket and spawns its driver
/// on the current event loop.
pub(crate) fn start_connection<W: Send + 'static>(
    stream: TcpStream,
    event_loop: EventLoop,
    registration: Registration,
    options: &SocketOptions,
    initializer: Option<&PipelineInitializer<W>>,
) -> Result<Connection<W>, Error> {
    let local_addr = stream.local_addr()?;
    let peer_addr = stream.peer_addr()?;

    let pipeline: Pipeline<ByteBuffer, W> = Pipeline::new();
    if let Some(initializer) = initializer {
        initializer(&pipeline)?;
    }
    let pipeline = pipeline.finalize();

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let inner = Arc::new(ConnectionInner::new(
        local_addr,
        peer_addr,
        event_loop,
        commands_tx,
    ));
    trace!(
        "connection {} established {} -> {}",
        inner.id(),
        local_addr,
        peer_addr
    );

    let driver = Driver {
        stream,
        pipeline,
        commands: commands_rx,
        registration,
        options: options.clone(),
        inner: Arc::clone(&inner),
        pending_writes: VecDeque::new(),
        close_promises: vec![],
    };
    spawn_local(driver.run()).detach();

    Ok(Connection::from_inner(inner))
}

struct Driver<W: Send + 'static> {
    stream: TcpStream,
    pipeline: Rc<Pipeline<ByteBuffer, W>>,
    commands: mpsc::UnboundedReceiver<Command<W>>,
    registration: Registration,
    options: SocketOptions,
    inner: Arc<ConnectionInner<W>>,
    pending_writes: VecDeque<EventLoopPromise<()>>,
    close_promises: Vec<EventLoopPromise<()>>,
}

impl<W: Send + 'static> Driver<W> {
    async fn run(mut self) {
        let write_notify = Arc::new(Notify::new());
        let notify = Arc::clone(&write_notify);
        self.pipeline.set_write_notify(Arc::new(move || {
            notify.notify_one();
        }));

        let mut sizer = self.options.recv_allocator.sizer();
        let mut buf = vec![];

        self.pipeline.transport_active();
        loop {
            // prioritize stream.write than stream.read
            if let Err(err) = self.flush().await {
                warn!("connection {} write error {}", self.inner.id(), err);
                self.pipeline.handle_error(Box::new(Error::Io(err)));
                break;
            }

            if self.pipeline.take_close_request() {
                trace!("connection {} close requested by pipeline", self.inner.id());
                break;
            }

            let mut eto = Instant::now() + DEFAULT_TIMEOUT_DURATION;
            self.pipeline.poll_timeout(&mut eto);

            let delay_from_now = eto
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::from_secs(0));
            if delay_from_now.is_zero() {
                self.pipeline.handle_timeout(Instant::now());
                continue;
            }

            let timer = tokio::time::sleep(delay_from_now);
            tokio::pin!(timer);

            buf.resize(sizer.next_size(), 0u8);

            tokio::select! {
                _ = self.registration.closed() => {
                    trace!("pipeline stream exit loop");
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Write(msg, promise)) => {
                            self.pipeline.write(msg);
                            self.pending_writes.push_back(promise);
                        }
                        Some(Command::Close(promise)) => {
                            self.close_promises.push(promise);
                            break;
                        }
                        Some(Command::Modify(f, promise)) => promise.complete(f(&*self.pipeline)),
                        None => break,
                    }
                }
                _ = write_notify.notified() => {}
                _ = timer.as_mut() => {
                    self.pipeline.handle_timeout(Instant::now());
                }
                res = self.stream.read(&mut buf) => {
                    match res {
                        Ok(0) => {
                            trace!("connection {} eof", self.inner.id());
                            self.pipeline.handle_eof();
                            break;
                        }
                        Ok(n) => {
                            trace!("stream read {} bytes", n);
                            sizer.record(n);
                            self.pipeline.handle_read(ByteBuffer::from(&buf[..n]));
                            self.pipeline.handle_read_complete();
                        }
                        Err(err) => {
                            warn!("stream read error {}", err);
                            self.pipeline.handle_error(Box::new(Error::Io(err)));
                            break;
                        }
                    }
                }
            }
        }

        self.close().await;
    }

    /// Writes everything the pipeline has ready, then completes the writes it covered.
    async fn flush(&mut self) -> Result<(), io::Error> {
        let mut wrote = false;
        while let Some(transmit) = self.pipeline.poll_write() {
            if transmit.is_empty() {
                continue;
            }
            self.stream.write_all(transmit.readable()).await?;
            trace!("stream write {} bytes", transmit.readable_bytes());
            wrote = true;
        }
        if wrote {
            self.stream.flush().await?;
        }
        if !self.pipeline.has_pending_write() {
            for promise in self.pending_writes.drain(..) {
                promise.succeed(());
            }
        }
        Ok(())
    }

    async fn close(mut self) {
        self.inner.set_closing();

        self.pipeline.handle_close();
        if let Err(err) = self.flush().await {
            debug!("connection {} final flush failed: {}", self.inner.id(), err);
        }
        if let Err(err) = self.stream.shutdown().await {
            debug!("connection {} shutdown failed: {}", self.inner.id(), err);
        }
        self.pipeline.transport_inactive();

        for promise in self.pending_writes.drain(..) {
            promise.fail(Error::Closed);
        }
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Write(_, promise) => promise.fail(Error::Closed),
                Command::Close(promise) => self.close_promises.push(promise),
                Command::Modify(_, promise) => promise.fail(Error::Closed),
            }
        }
        for promise in self.close_promises.drain(..) {
            promise.succeed(());
        }
        self.inner.set_closed();

        trace!(
            "tcp connection {} on {} is gracefully down",
            self.inner.id(),
            self.stream
                .peer_addr()
                .map_or_else(|_| "<unknown>".to_string(), |addr| addr.to_string())
        );
    }
}
