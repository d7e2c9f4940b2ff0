use crate::error::KernelError;
use crate::process::{ProcessId, ProcessTable};

/// The set of processes whose timeout countdown is running. The countdown
/// itself is stored in each process descriptor, next to the
/// `awaiting_timeout` flag.
#[derive(Debug, Default)]
pub struct TimeoutTracker {
    armed: heapless::Vec<ProcessId, { config::MAX_PROCESSES }>,
}

/// The processes whose countdown expired during one clock tick, in the order
/// they were armed.
pub type Expired = heapless::Vec<ProcessId, { config::MAX_PROCESSES }>;

impl TimeoutTracker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            armed: heapless::Vec::new(),
        }
    }

    /// Start a countdown of `duration` milliseconds for a process and flag it
    /// as awaiting a timeout.
    ///
    /// # Errors
    /// Returns [`KernelError::InvariantViolation`] if the process is already
    /// armed, since a process can only block in one place at a time.
    pub fn arm<C>(
        &mut self,
        processes: &mut ProcessTable<C>,
        pid: ProcessId,
        duration: u64,
    ) -> Result<(), KernelError> {
        if self.armed.contains(&pid) {
            return Err(KernelError::InvariantViolation);
        }
        self.armed
            .push(pid)
            .map_err(|_| KernelError::InvariantViolation)?;

        let process = &mut processes[pid];
        process.timeout = Some(duration);
        process.awaiting_timeout = true;
        Ok(())
    }

    /// Stop the countdown of a process and clear its flag. This is what a
    /// notification does to a process in a timed wait.
    pub fn disarm<C>(&mut self, processes: &mut ProcessTable<C>, pid: ProcessId) {
        self.armed.retain(|armed| *armed != pid);
        let process = &mut processes[pid];
        process.timeout = None;
        process.awaiting_timeout = false;
    }

    /// Advance every countdown by `elapsed` milliseconds and return the
    /// processes whose countdown reached zero. Expired processes leave the
    /// armed set but keep their `awaiting_timeout` flag.
    ///
    /// # Panics
    /// Never panics: the expired set is as large as the armed set.
    pub fn advance<C>(&mut self, processes: &mut ProcessTable<C>, elapsed: u64) -> Expired {
        let mut expired = Expired::new();
        self.armed.retain(|&pid| {
            let process = &mut processes[pid];
            let remaining = process.timeout.map_or(0, |left| left.saturating_sub(elapsed));
            if remaining == 0 {
                process.timeout = None;
                expired
                    .push(pid)
                    .expect("the expired set has the capacity of the armed set");
                false
            } else {
                process.timeout = Some(remaining);
                true
            }
        });
        expired
    }

    #[must_use]
    pub fn is_armed(&self, pid: ProcessId) -> bool {
        self.armed.contains(&pid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}
