use core::fmt;

use crate::list::List;
use crate::process::ProcessId;

/// The identifier of a monitor, handed out in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonitorId(u16);

impl MonitorId {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u16)
    }

    /// Build an identifier from a raw index, for instance one received from
    /// application code. Nothing is checked until the identifier is used.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The process holding a monitor and how many nested times it entered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holder {
    pub pid: ProcessId,
    pub depth: usize,
}

/// A monitor descriptor: a reentrant mutual-exclusion lock with an attached
/// condition variable.
///
/// A free monitor has no holder, so "free" and "no owner" cannot disagree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Monitor {
    /// The current holder, or `None` when the monitor is free.
    pub(crate) holder: Option<Holder>,

    /// Processes blocked while trying to enter the monitor.
    pub(crate) entry: List,

    /// Processes blocked inside `wait` on this monitor.
    pub(crate) waiting: List,
}

impl Monitor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            holder: None,
            entry: List::new(),
            waiting: List::new(),
        }
    }

    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.holder.is_none()
    }

    /// The process holding the monitor.
    #[must_use]
    pub fn owner(&self) -> Option<ProcessId> {
        self.holder.map(|holder| holder.pid)
    }

    /// The nesting depth of the holder, zero when the monitor is free.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.holder.map_or(0, |holder| holder.depth)
    }

    #[must_use]
    pub fn is_held_by(&self, pid: ProcessId) -> bool {
        self.owner() == Some(pid)
    }

    /// Give the monitor to a process with a nesting depth of one. Used both
    /// when a free monitor is entered and when ownership is handed over
    /// directly to a blocked process.
    pub(crate) fn grant(&mut self, pid: ProcessId) {
        self.holder = Some(Holder { pid, depth: 1 });
    }

    #[must_use]
    pub const fn entry_queue(&self) -> &List {
        &self.entry
    }

    #[must_use]
    pub const fn wait_queue(&self) -> &List {
        &self.waiting
    }
}
