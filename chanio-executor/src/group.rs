use std::sync::atomic::{AtomicUsize, Ordering};

use chanio::Error;
use log::warn;

use crate::{EventLoop, EventLoopBuilder};

/// N independent event loops handed out round-robin.
#[derive(Debug)]
pub struct EventLoopGroup {
    loops: Vec<EventLoop>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    /// Starts `n` loops (at least one) named `<prefix>-<index>`.
    pub fn new(n: usize, prefix: &str) -> Result<Self, Error> {
        let loops = (0..n.max(1))
            .map(|i| {
                EventLoopBuilder::new()
                    .name(&format!("{}-{}", prefix, i))
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            loops,
            next: AtomicUsize::new(0),
        })
    }

    /// The loop the next connection should be bound to.
    pub fn next(&self) -> EventLoop {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        self.loops[i].clone()
    }

    /// Every loop of the group.
    pub fn iter(&self) -> impl Iterator<Item = &EventLoop> {
        self.loops.iter()
    }

    /// Number of loops.
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Always false: a group holds at least one loop.
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Shuts every loop down, reporting the first failure.
    pub fn shutdown_gracefully(&self) -> Result<(), Error> {
        let mut first_err = None;
        for event_loop in &self.loops {
            if let Err(err) = event_loop.shutdown_gracefully() {
                warn!("{} shutdown failed: {}", event_loop.name(), err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let group = EventLoopGroup::new(3, "test-group").unwrap();
        assert_eq!(group.len(), 3);

        let picked: Vec<EventLoop> = (0..6).map(|_| group.next()).collect();
        assert_eq!(picked[0], picked[3]);
        assert_eq!(picked[1], picked[4]);
        assert_ne!(picked[0], picked[1]);
        assert_ne!(picked[1], picked[2]);
        assert_eq!(picked[0].name(), "test-group-0");

        drop(picked);
        group.shutdown_gracefully().unwrap();
        assert!(group.iter().all(|l| l.is_shut_down()));
    }
}
