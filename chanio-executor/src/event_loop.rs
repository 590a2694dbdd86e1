//! Single-threaded event loop built on a tokio current-thread runtime and `LocalSet`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use chanio::Error;
use core_affinity::{set_for_current, CoreId};
use log::{debug, trace, warn};
use scoped_tls::scoped_thread_local;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::LocalSet;
use wg::AsyncWaitGroup;

use crate::future::{EventLoopFuture, EventLoopPromise};

scoped_thread_local!(static LOCAL: LocalSet);

type Job = Box<dyn FnOnce() + Send>;

static NEXT_LOOP_ID: AtomicUsize = AtomicUsize::new(0);

/// A factory that configures and starts an [`EventLoop`].
#[derive(Debug, Default)]
pub struct EventLoopBuilder {
    core_id: Option<CoreId>,
    name: String,
}

impl EventLoopBuilder {
    /// Creates a new EventLoopBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the loop thread.
    pub fn name(mut self, name: &str) -> Self {
        self.name = String::from(name);
        self
    }

    /// Pins the loop thread to the specified CPU core
    pub fn core_id(mut self, core_id: CoreId) -> Self {
        self.core_id = Some(core_id);
        self
    }

    /// Spawns the loop thread and returns a handle to it.
    pub fn build(mut self) -> Result<EventLoop, Error> {
        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);
        let name = if self.name.is_empty() {
            format!("chanio-loop-{}", id)
        } else {
            self.name
        };

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (close_tx, _) = broadcast::channel::<()>(1);
        let wait_group = AsyncWaitGroup::new();

        let mut core_id = self.core_id.take();
        let thread_name = name.clone();
        let thread_close_tx = close_tx.clone();
        let thread_wait_group = wait_group.clone();
        let join = thread::Builder::new().name(name.clone()).spawn(move || {
            if let Some(core_id) = core_id.take() {
                set_for_current(core_id);
            }

            let _guard = rt.enter();
            let local_set = LocalSet::new();
            LOCAL.set(&local_set, || {
                rt.block_on(local_set.run_until(run_loop(
                    &thread_name,
                    job_rx,
                    stop_rx,
                    thread_close_tx,
                    thread_wait_group,
                )))
            });
            drop(local_set);
            trace!("{} thread exit", thread_name);
        })?;

        Ok(EventLoop {
            inner: Arc::new(Inner {
                id,
                name,
                thread_id: join.thread().id(),
                job_tx,
                stop_tx: Mutex::new(Some(stop_tx)),
                close_tx,
                wait_group,
                join: Mutex::new(Some(join)),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

async fn run_loop(
    name: &str,
    mut job_rx: mpsc::UnboundedReceiver<Job>,
    mut stop_rx: oneshot::Receiver<()>,
    close_tx: broadcast::Sender<()>,
    wait_group: AsyncWaitGroup,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                trace!("{} received shutdown", name);
                break;
            }
            job = job_rx.recv() => {
                match job {
                    Some(job) => job(),
                    None => break,
                }
            }
        }
    }

    job_rx.close();
    let mut cancelled = 0usize;
    while job_rx.try_recv().is_ok() {
        cancelled += 1;
    }
    if cancelled > 0 {
        warn!("{} cancelled {} queued tasks on shutdown", name, cancelled);
    }

    let _ = close_tx.send(());
    wait_group.wait().await;
    trace!("{} all registrations closed", name);
}

/// Handle to a single-threaded event loop.
///
/// All I/O callbacks of the connections bound to a loop, and all work
/// scheduled on it, run on the loop's one thread, so they never run
/// concurrently with each other. The handle is cheap to clone and `Send`.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<Inner>,
}

struct Inner {
    id: usize,
    name: String,
    thread_id: ThreadId,
    job_tx: mpsc::UnboundedSender<Job>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    close_tx: broadcast::Sender<()>,
    wait_group: AsyncWaitGroup,
    join: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl EventLoop {
    /// Starts a loop with a named thread.
    pub fn new(name: &str) -> Result<Self, Error> {
        EventLoopBuilder::new().name(name).build()
    }

    /// Name of the loop thread.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the caller runs on this loop's thread.
    pub fn in_event_loop(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Whether [`EventLoop::shutdown_gracefully`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Enqueues `task` to run on the loop thread.
    ///
    /// Never blocks. Tasks from one producer run in the order they were scheduled.
    pub fn schedule<F>(&self, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(Error::EventLoopShutdown);
        }
        self.inner
            .job_tx
            .send(Box::new(task))
            .map_err(|_| Error::EventLoopShutdown)
    }

    /// Schedules `task` and returns a future of its result.
    pub fn submit<T, F>(&self, task: F) -> EventLoopFuture<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (promise, future) = self.make_promise();
        match self.schedule(move || promise.succeed(task())) {
            Ok(()) => future,
            Err(err) => EventLoopFuture::failed(self.clone(), err),
        }
    }

    /// Creates a promise whose continuations run on this loop.
    pub fn make_promise<T: Send + 'static>(&self) -> (EventLoopPromise<T>, EventLoopFuture<T>) {
        EventLoopPromise::new(self.clone())
    }

    /// Runs `f` on the loop thread: inline when already there, scheduled otherwise.
    ///
    /// If the loop no longer accepts work, `f` runs on the caller's thread so
    /// that a continuation is never silently lost.
    pub(crate) fn run_on_loop(&self, f: Job) {
        if self.in_event_loop() {
            f();
        } else if let Err(err) = self.inner.job_tx.send(f) {
            debug!("{} is shut down, running continuation inline", self.name());
            (err.0)();
        }
    }

    /// Hands a connection driver its shutdown receiver and wait-group ticket.
    ///
    /// Fails once shutdown has started.
    pub fn register(&self) -> Result<Registration, Error> {
        if self.is_shut_down() {
            return Err(Error::EventLoopShutdown);
        }
        Ok(Registration {
            close_rx: self.inner.close_tx.subscribe(),
            worker: self.inner.wait_group.add(1),
        })
    }

    /// Closes every registered connection, waits for their drivers to exit,
    /// cancels queued tasks, and joins the loop thread.
    ///
    /// A second call is a no-op. Calling it from the loop thread is refused
    /// since the thread would have to join itself.
    pub fn shutdown_gracefully(&self) -> Result<(), Error> {
        if self.in_event_loop() {
            return Err(Error::Other(format!(
                "{} cannot shut down from its own thread",
                self.name()
            )));
        }
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            debug!("{} is already shut down", self.name());
            return Ok(());
        }

        self.inner.stop();
        let join = lock(&self.inner.join).take();
        if let Some(join) = join {
            join.join()
                .map_err(|_| Error::Other(format!("{} thread panicked", self.name())))?;
        }
        trace!("{} is gracefully down", self.name());
        Ok(())
    }
}

impl Inner {
    fn stop(&self) {
        if let Some(stop_tx) = lock(&self.stop_tx).take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            self.stop();
            if thread::current().id() != self.thread_id {
                if let Some(join) = lock(&self.join).take() {
                    let _ = join.join();
                }
            }
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl PartialEq for EventLoop {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for EventLoop {}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A connection's membership in its loop's shutdown protocol.
///
/// The loop waits for every registration to be dropped before its thread exits.
pub struct Registration {
    close_rx: broadcast::Receiver<()>,
    worker: AsyncWaitGroup,
}

impl Registration {
    /// Resolves when the loop starts shutting down.
    pub async fn closed(&mut self) {
        let _ = self.close_rx.recv().await;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.worker.done();
    }
}

/// A handle to a task spawned with [`spawn_local`].
///
/// Awaiting it yields the task's output, or an error if it panicked or was cancelled.
pub struct Task<T> {
    inner: tokio::task::JoinHandle<T>,
}

impl<T> Future for Task<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|result| result.map_err(|err| Error::Other(err.to_string())))
    }
}

impl<T> Task<T> {
    /// Lets the task run to completion in the background.
    pub fn detach(self) {
        drop(self.inner);
    }

    /// Aborts the task.
    pub fn cancel(self) {
        self.inner.abort();
    }
}

/// Spawns a `!Send` task onto the event loop the caller runs on.
///
/// # Panics
///
/// Panics if called outside of an event loop thread.
pub fn spawn_local<T: 'static>(future: impl Future<Output = T> + 'static) -> Task<T> {
    if LOCAL.is_set() {
        LOCAL.with(|local_set| Task {
            inner: local_set.spawn_local(future),
        })
    } else {
        panic!("`spawn_local()` must be called from an event loop thread")
    }
}
