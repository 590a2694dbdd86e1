/// Chooses how large each socket read buffer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvBufferAllocator {
    /// Every read uses the same size.
    Fixed(usize),
    /// Sizes follow the traffic: they grow after a read fills the buffer and
    /// shrink after two consecutive reads that used at most half of it.
    Adaptive {
        /// Lower bound.
        min: usize,
        /// Size of the first read.
        initial: usize,
        /// Upper bound.
        max: usize,
    },
}

impl Default for RecvBufferAllocator {
    fn default() -> Self {
        RecvBufferAllocator::Adaptive {
            min: 64,
            initial: 2048,
            max: 65536,
        }
    }
}

impl RecvBufferAllocator {
    /// Creates the per-connection sizing state.
    pub fn sizer(&self) -> RecvBufferSizer {
        match *self {
            RecvBufferAllocator::Fixed(size) => RecvBufferSizer {
                min: size.max(1),
                max: size.max(1),
                current: size.max(1),
                small_reads: 0,
            },
            RecvBufferAllocator::Adaptive { min, initial, max } => {
                let min = min.max(1);
                let max = max.max(min);
                RecvBufferSizer {
                    min,
                    max,
                    current: initial.clamp(min, max),
                    small_reads: 0,
                }
            }
        }
    }
}

/// Read-size state of one connection.
#[derive(Debug, Clone)]
pub struct RecvBufferSizer {
    min: usize,
    max: usize,
    current: usize,
    small_reads: u8,
}

impl RecvBufferSizer {
    /// Size to use for the next read.
    pub fn next_size(&self) -> usize {
        self.current
    }

    /// Records how many bytes the last read returned.
    pub fn record(&mut self, bytes_read: usize) {
        if bytes_read >= self.current {
            self.small_reads = 0;
            self.current = self.current.saturating_mul(2).min(self.max);
        } else if bytes_read <= self.current / 2 {
            self.small_reads += 1;
            if self.small_reads >= 2 {
                self.small_reads = 0;
                self.current = (self.current / 2).max(self.min);
            }
        } else {
            self.small_reads = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_never_changes() {
        let mut sizer = RecvBufferAllocator::Fixed(512).sizer();
        sizer.record(512);
        sizer.record(512);
        assert_eq!(sizer.next_size(), 512);
        sizer.record(1);
        sizer.record(1);
        assert_eq!(sizer.next_size(), 512);
    }

    #[test]
    fn test_adaptive_grows_on_full_reads() {
        let mut sizer = RecvBufferAllocator::Adaptive {
            min: 64,
            initial: 1024,
            max: 4096,
        }
        .sizer();
        assert_eq!(sizer.next_size(), 1024);
        sizer.record(1024);
        assert_eq!(sizer.next_size(), 2048);
        sizer.record(2048);
        sizer.record(4096);
        assert_eq!(sizer.next_size(), 4096);
    }

    #[test]
    fn test_adaptive_shrinks_after_two_small_reads() {
        let mut sizer = RecvBufferAllocator::Adaptive {
            min: 256,
            initial: 1024,
            max: 4096,
        }
        .sizer();
        sizer.record(10);
        assert_eq!(sizer.next_size(), 1024);
        sizer.record(10);
        assert_eq!(sizer.next_size(), 512);

        // a medium read resets the streak
        sizer.record(10);
        sizer.record(400);
        sizer.record(10);
        assert_eq!(sizer.next_size(), 512);

        sizer.record(10);
        sizer.record(10);
        sizer.record(10);
        assert_eq!(sizer.next_size(), 256);
    }
}
