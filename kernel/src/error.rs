use core::fmt;

/// Every failure the kernel can report. None of them are recoverable: the
/// application-facing [`System`](crate::system::System) logs the error and
/// halts the machine, while the [`Kernel`](crate::kernel::Kernel) state
/// machine only reports them to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelError {
    /// A fixed-size table (processes, monitors, events) is full, or the
    /// substrate could not allocate an execution context.
    ResourceExhausted,

    /// The monitor identifier does not name a created monitor.
    InvalidMonitor,

    /// The event identifier does not name a created event.
    InvalidEvent,

    /// A negative duration was given to a timed operation.
    InvalidTimeout,

    /// The interrupt channel is reserved for the kernel.
    InvalidChannel,

    /// `wait`, `notify` or `exit_monitor` was called by a process that does
    /// not hold a monitor.
    NotInMonitor,

    /// An event was awaited by a process that holds a monitor.
    EventInMonitor,

    /// The caller's monitor stack is full.
    TooManyNestedMonitors,

    /// The ready list is empty while an operation needs a current process.
    NoReadyProcess,

    /// The kernel state is inconsistent. This is never the caller's fault
    /// and indicates a bug in the scheduler or in the monitor protocol.
    InvariantViolation,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            KernelError::ResourceExhausted => "kernel resources exhausted",
            KernelError::InvalidMonitor => "monitor does not exist",
            KernelError::InvalidEvent => "event does not exist",
            KernelError::InvalidTimeout => "timeout must not be negative",
            KernelError::InvalidChannel => "interrupt channel is reserved",
            KernelError::NotInMonitor => "called outside of a monitor",
            KernelError::EventInMonitor => "event awaited inside a monitor",
            KernelError::TooManyNestedMonitors => "too many nested monitors",
            KernelError::NoReadyProcess => "no process in the ready list",
            KernelError::InvariantViolation => "the kernel has performed an illegal operation",
        };
        f.write_str(message)
    }
}

impl core::error::Error for KernelError {}
