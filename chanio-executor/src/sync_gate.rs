//! One-shot bridge from an event loop thread to a blocked caller thread.

use std::time::Duration;

use chanio::Error;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::debug;

/// Creates a connected signal/gate pair.
///
/// The signal goes to the producer on the loop thread (typically a terminal
/// handler), the gate stays with the caller that blocks for the outcome.
pub fn sync_gate<T>() -> (GateSignal<T>, SyncGate<T>) {
    let (tx, rx) = bounded(1);
    (GateSignal { tx }, SyncGate { rx })
}

/// Producer half of a [`sync_gate`]. Releasing consumes it, so it posts at most once.
///
/// Dropping it unreleased wakes the waiter with [`Error::BrokenPromise`].
#[derive(Debug)]
pub struct GateSignal<T> {
    tx: Sender<Result<T, Error>>,
}

impl<T> GateSignal<T> {
    /// Posts the outcome and wakes the waiter.
    pub fn release(self, result: Result<T, Error>) {
        if self.tx.try_send(result).is_err() {
            debug!("sync gate released after its waiter went away");
        }
    }
}

/// Consumer half of a [`sync_gate`]. Waiting consumes it, so it receives at most once.
#[derive(Debug)]
pub struct SyncGate<T> {
    rx: Receiver<Result<T, Error>>,
}

impl<T> SyncGate<T> {
    /// Blocks until the signal is released or dropped.
    pub fn wait(self) -> Result<T, Error> {
        self.rx.recv().unwrap_or(Err(Error::BrokenPromise))
    }

    /// Blocks for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, Error> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::BrokenPromise),
        }
    }
}
