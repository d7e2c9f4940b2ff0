use core::fmt;
use core::ops::{Index, IndexMut};

use crate::error::KernelError;
use crate::list::{Link, Links};
use crate::monitor::MonitorId;

/// The identifier of a process. Identifiers are handed out in creation order,
/// starting at zero, and are never reused since processes are never
/// destroyed. They double as the index of the process in the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u16);

impl ProcessId {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u16)
    }

    /// The index of the process in the process table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A process descriptor.
#[derive(Debug)]
pub struct Process<C> {
    /// The execution context of the process, managed by the substrate.
    context: C,

    /// Linkage in the ready list or in a monitor or event queue.
    pub(crate) link: Link,

    /// The monitors currently entered by the process, innermost last. A
    /// monitor appears once per nested `enter_monitor` call.
    pub(crate) monitors: heapless::Vec<MonitorId, { config::MAX_MONITORS }>,

    /// The remaining time, in milliseconds, before a pending timed wait or
    /// sleep expires. `None` when no countdown is running.
    pub(crate) timeout: Option<u64>,

    /// Set while the process is registered for a timed wait or a sleep. The
    /// timeout scan leaves it set when the countdown expires and only a
    /// notification clears it, which is how a timed wait tells a timeout
    /// from a notification.
    pub(crate) awaiting_timeout: bool,
}

impl<C> Process<C> {
    #[must_use]
    pub const fn new(context: C) -> Self {
        Self {
            context,
            link: Link::new(),
            monitors: heapless::Vec::new(),
            timeout: None,
            awaiting_timeout: false,
        }
    }

    /// The execution context of the process.
    #[must_use]
    pub const fn context(&self) -> &C {
        &self.context
    }

    /// The innermost monitor entered by the process, if any.
    #[must_use]
    pub fn current_monitor(&self) -> Option<MonitorId> {
        self.monitors.last().copied()
    }

    /// The number of nested monitor entries of the process.
    #[must_use]
    pub fn monitor_depth(&self) -> usize {
        self.monitors.len()
    }

    /// Whether the process is registered for a timed wait or a sleep.
    #[must_use]
    pub const fn is_awaiting_timeout(&self) -> bool {
        self.awaiting_timeout
    }

    #[must_use]
    pub const fn timeout(&self) -> Option<u64> {
        self.timeout
    }
}

/// The fixed-capacity process table. The kernel cannot allocate memory, so
/// every descriptor lives in this table for the whole lifetime of the system.
#[derive(Debug)]
pub struct ProcessTable<C> {
    processes: heapless::Vec<Process<C>, { config::MAX_PROCESSES }>,
}

impl<C> ProcessTable<C> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            processes: heapless::Vec::new(),
        }
    }

    /// Add a process to the table and return its identifier.
    ///
    /// # Errors
    /// Returns [`KernelError::ResourceExhausted`] if the table is full.
    pub fn insert(&mut self, process: Process<C>) -> Result<ProcessId, KernelError> {
        let pid = ProcessId::new(self.processes.len());
        self.processes
            .push(process)
            .map_err(|_| KernelError::ResourceExhausted)?;
        Ok(pid)
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.processes.is_full()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    #[must_use]
    pub fn get(&self, pid: ProcessId) -> Option<&Process<C>> {
        self.processes.get(pid.index())
    }
}

impl<C> Default for ProcessTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Index<ProcessId> for ProcessTable<C> {
    type Output = Process<C>;

    fn index(&self, pid: ProcessId) -> &Process<C> {
        &self.processes[pid.index()]
    }
}

impl<C> IndexMut<ProcessId> for ProcessTable<C> {
    fn index_mut(&mut self, pid: ProcessId) -> &mut Process<C> {
        &mut self.processes[pid.index()]
    }
}

impl<C> Links for ProcessTable<C> {
    fn link(&self, pid: ProcessId) -> &Link {
        &self[pid].link
    }

    fn link_mut(&mut self, pid: ProcessId) -> &mut Link {
        &mut self[pid].link
    }
}
