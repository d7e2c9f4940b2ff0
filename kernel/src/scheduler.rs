/// The timing parameters of the scheduler, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// The time elapsed between two clock interrupts.
    pub clock_period: u64,

    /// The time a process may run before the ready list is rotated.
    pub time_slice: u64,
}

impl Timing {
    /// The timing described by the `config` crate.
    pub const DEFAULT: Timing = Timing {
        clock_period: config::CLOCK_PERIOD,
        time_slice: config::TIME_SLICE,
    };
}

impl Default for Timing {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Round-robin time-slice accounting. The scheduler feeds it every clock
/// interrupt and rotates the ready list when it says so; this is the only
/// source of preemption in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlice {
    length: u64,
    elapsed: u64,
}

impl TimeSlice {
    #[must_use]
    pub const fn new(length: u64) -> Self {
        Self { length, elapsed: 0 }
    }

    /// Account for `period` milliseconds of execution. Returns true when the
    /// accumulated time exceeds the slice length, in which case the
    /// accumulator starts over.
    pub fn advance(&mut self, period: u64) -> bool {
        self.elapsed = self.elapsed.saturating_add(period);
        if self.elapsed > self.length {
            self.elapsed = 0;
            true
        } else {
            false
        }
    }

    /// The time accumulated since the last rotation.
    #[must_use]
    pub const fn elapsed(&self) -> u64 {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_expires_once_exceeded() {
        let mut slice = TimeSlice::new(3);
        assert!(!slice.advance(1));
        assert!(!slice.advance(1));
        assert!(!slice.advance(1));
        assert!(slice.advance(1));
        assert_eq!(slice.elapsed(), 0);
    }

    #[test]
    fn test_default_timing_comes_from_config() {
        let timing = Timing::default();
        assert_eq!(timing.clock_period, config::CLOCK_PERIOD);
        assert_eq!(timing.time_slice, config::TIME_SLICE);
    }
}
