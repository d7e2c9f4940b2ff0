use core::fmt;

use crate::list::List;

/// The identifier of an event, handed out in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u16);

impl EventId {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u16)
    }

    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A manual-reset event. Once triggered, it stays triggered and lets every
/// process that awaits it through until it is reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub(crate) happened: bool,
    pub(crate) waiting: List,
}

impl Event {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            happened: false,
            waiting: List::new(),
        }
    }

    #[must_use]
    pub const fn has_happened(&self) -> bool {
        self.happened
    }

    /// Processes blocked until the event is triggered.
    #[must_use]
    pub const fn wait_queue(&self) -> &List {
        &self.waiting
    }
}
