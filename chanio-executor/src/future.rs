//! Write-once promises and their single-consumer futures, bound to an [`EventLoop`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use chanio::Error;
use log::warn;

use crate::event_loop::{lock, EventLoop};

type Callback<T> = Box<dyn FnOnce(Result<T, Error>) + Send>;

struct State<T> {
    completed: bool,
    result: Option<Result<T, Error>>,
    waker: Option<Waker>,
    callback: Option<Callback<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

/// The write side of an [`EventLoopFuture`].
///
/// A promise is completed at most once; later completions are ignored with a
/// warning. Dropping a promise that was never completed fails its future with
/// [`Error::BrokenPromise`].
pub struct EventLoopPromise<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    event_loop: EventLoop,
}

impl<T: Send + 'static> EventLoopPromise<T> {
    pub(crate) fn new(event_loop: EventLoop) -> (Self, EventLoopFuture<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                completed: false,
                result: None,
                waker: None,
                callback: None,
            }),
            cond: Condvar::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
                event_loop: event_loop.clone(),
            },
            EventLoopFuture { shared, event_loop },
        )
    }

    /// Completes the future with a value.
    pub fn succeed(&self, value: T) {
        self.complete(Ok(value));
    }

    /// Completes the future with an error.
    pub fn fail(&self, err: Error) {
        self.complete(Err(err));
    }

    /// Whether the promise has been completed.
    pub fn is_completed(&self) -> bool {
        lock(&self.shared.state).completed
    }

    /// Completes the future with `result`.
    pub fn complete(&self, result: Result<T, Error>) {
        if let Some((callback, result)) = self.settle(result) {
            self.event_loop
                .run_on_loop(Box::new(move || callback(result)));
        }
    }

    fn settle(&self, result: Result<T, Error>) -> Option<(Callback<T>, Result<T, Error>)> {
        let mut state = lock(&self.shared.state);
        if state.completed {
            warn!("promise completed more than once, keeping the first outcome");
            return None;
        }
        state.completed = true;

        if let Some(callback) = state.callback.take() {
            return Some((callback, result));
        }
        state.result = Some(result);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
        self.shared.cond.notify_all();
        None
    }
}

impl<T: Send + 'static> Drop for EventLoopPromise<T> {
    fn drop(&mut self) {
        if !self.is_completed() {
            self.complete(Err(Error::BrokenPromise));
        }
    }
}

impl<T: Send + 'static> fmt::Debug for EventLoopPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopPromise")
            .field("event_loop", &self.event_loop)
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// The read side of a pending result produced on an [`EventLoop`].
///
/// A future has exactly one consumer: it is either waited on, awaited, or
/// chained with one of the combinators, each of which consumes it.
/// Continuations always run on the owning loop's thread.
pub struct EventLoopFuture<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    event_loop: EventLoop,
}

impl<T: Send + 'static> EventLoopFuture<T> {
    /// A future that already holds `value`.
    pub fn succeeded(event_loop: EventLoop, value: T) -> Self {
        let (promise, future) = EventLoopPromise::new(event_loop);
        promise.succeed(value);
        future
    }

    /// A future that already holds `err`.
    pub fn failed(event_loop: EventLoop, err: Error) -> Self {
        let (promise, future) = EventLoopPromise::new(event_loop);
        promise.fail(err);
        future
    }

    /// The loop continuations run on.
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// Whether an outcome is available.
    pub fn is_completed(&self) -> bool {
        lock(&self.shared.state).completed
    }

    /// Blocks the calling thread until the outcome is available.
    ///
    /// Returns an error instead of blocking when called on the loop thread
    /// itself, since the outcome could then never be produced.
    pub fn wait(self) -> Result<T, Error> {
        self.wait_until(None)
    }

    /// Like [`EventLoopFuture::wait`], failing with [`Error::Timeout`] after `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, Error> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(self, deadline: Option<Instant>) -> Result<T, Error> {
        if self.event_loop.in_event_loop() {
            return Err(Error::Other(format!(
                "blocking wait on {} would deadlock its own thread",
                self.event_loop.name()
            )));
        }

        let mut state = lock(&self.shared.state);
        loop {
            if let Some(result) = state.result.take() {
                return result;
            }
            state = match deadline {
                None => self
                    .shared
                    .cond
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    self.shared
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    /// Runs `callback` with the outcome, on the loop thread, once it is available.
    pub fn on_complete<F>(self, callback: F)
    where
        F: FnOnce(Result<T, Error>) + Send + 'static,
    {
        let ready = {
            let mut state = lock(&self.shared.state);
            match state.result.take() {
                Some(result) => Some(result),
                None => {
                    state.callback = Some(Box::new(callback));
                    return;
                }
            }
        };
        if let Some(result) = ready {
            self.event_loop
                .run_on_loop(Box::new(move || callback(result)));
        }
    }

    /// Transforms a successful outcome; failures pass through untouched.
    pub fn map<U, F>(self, f: F) -> EventLoopFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (promise, future) = EventLoopPromise::new(self.event_loop.clone());
        self.on_complete(move |result| promise.complete(result.map(f)));
        future
    }

    /// Chains another asynchronous step after a successful outcome.
    pub fn and_then<U, F>(self, f: F) -> EventLoopFuture<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> EventLoopFuture<U> + Send + 'static,
    {
        let (promise, future) = EventLoopPromise::new(self.event_loop.clone());
        self.on_complete(move |result| match result {
            Ok(value) => f(value).on_complete(move |result| promise.complete(result)),
            Err(err) => promise.fail(err),
        });
        future
    }

    /// Transforms a failure; successes pass through untouched.
    pub fn map_err<F>(self, f: F) -> EventLoopFuture<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        let (promise, future) = EventLoopPromise::new(self.event_loop.clone());
        self.on_complete(move |result| promise.complete(result.map_err(f)));
        future
    }
}

impl<T: Send + 'static> Future for EventLoopFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock(&self.shared.state);
        if let Some(result) = state.result.take() {
            Poll::Ready(result)
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T: Send + 'static> fmt::Debug for EventLoopFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopFuture")
            .field("event_loop", &self.event_loop)
            .field("completed", &self.is_completed())
            .finish()
    }
}
