use std::time::Duration;

use crate::RecvBufferAllocator;

/// Socket-level settings applied to every connection a bootstrap opens or accepts.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    /// `SO_REUSEADDR`.
    pub reuse_addr: bool,
    /// `TCP_NODELAY`.
    pub no_delay: bool,
    /// Read buffer sizing.
    pub recv_allocator: RecvBufferAllocator,
    /// Upper bound on establishing the TCP connection; `None` waits for the OS.
    pub connect_timeout: Option<Duration>,
}

impl SocketOptions {
    /// Default options: no address reuse, Nagle enabled, adaptive reads, no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `SO_REUSEADDR`.
    pub fn reuse_addr(mut self, reuse_addr: bool) -> Self {
        self.reuse_addr = reuse_addr;
        self
    }

    /// Sets `TCP_NODELAY`.
    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }

    /// Sets the read buffer allocator.
    pub fn recv_allocator(mut self, recv_allocator: RecvBufferAllocator) -> Self {
        self.recv_allocator = recv_allocator;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let options = SocketOptions::new()
            .reuse_addr(true)
            .no_delay(true)
            .recv_allocator(RecvBufferAllocator::Fixed(4096))
            .connect_timeout(Duration::from_secs(3));

        assert!(options.reuse_addr);
        assert!(options.no_delay);
        assert_eq!(options.recv_allocator, RecvBufferAllocator::Fixed(4096));
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(3)));

        let defaults = SocketOptions::default();
        assert!(!defaults.reuse_addr && !defaults.no_delay);
        assert_eq!(defaults.connect_timeout, None);
    }
}
