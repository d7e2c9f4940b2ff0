use crate::error::KernelError;
use crate::process::ProcessId;

/// The linkage embedded in every process descriptor. A process is a member of
/// at most one list at a time: the ready list, a monitor's entry or wait
/// queue, or an event's wait queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// The next process in the list, or `None` at the tail or when unlinked.
    next: Option<ProcessId>,

    /// Whether the process is currently a member of some list.
    linked: bool,
}

impl Link {
    /// Create an unlinked link.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: None,
            linked: false,
        }
    }

    /// The next process in the list.
    #[must_use]
    pub const fn next(&self) -> Option<ProcessId> {
        self.next
    }

    /// Whether the owning process is a member of a list.
    #[must_use]
    pub const fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Storage of the [`Link`] of each process. Lists only store their head and
/// tail, and walk through this storage to follow the chain.
pub trait Links {
    /// The link of the given process.
    fn link(&self, pid: ProcessId) -> &Link;

    /// The link of the given process, mutably.
    fn link_mut(&mut self, pid: ProcessId) -> &mut Link;
}

impl Links for [Link] {
    fn link(&self, pid: ProcessId) -> &Link {
        &self[pid.index()]
    }

    fn link_mut(&mut self, pid: ProcessId) -> &mut Link {
        &mut self[pid.index()]
    }
}

/// A singly-linked FIFO of processes threaded through their [`Link`]s. No
/// allocation happens here: pushing a process only rewrites two links.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct List {
    head: Option<ProcessId>,
    tail: Option<ProcessId>,
    len: usize,
}

impl List {
    /// Create an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// The first process of the list.
    #[must_use]
    pub const fn head(&self) -> Option<ProcessId> {
        self.head
    }

    /// The number of processes in the list.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append a process at the tail of the list.
    ///
    /// # Errors
    /// Returns [`KernelError::InvariantViolation`] if the process is already
    /// a member of a list.
    pub fn push_back<L: Links + ?Sized>(
        &mut self,
        links: &mut L,
        pid: ProcessId,
    ) -> Result<(), KernelError> {
        Self::claim(links, pid, None)?;
        match self.tail {
            Some(tail) => links.link_mut(tail).next = Some(pid),
            None => self.head = Some(pid),
        }
        self.tail = Some(pid);
        self.len += 1;
        Ok(())
    }

    /// Insert a process at the head of the list.
    ///
    /// # Errors
    /// Returns [`KernelError::InvariantViolation`] if the process is already
    /// a member of a list.
    pub fn push_front<L: Links + ?Sized>(
        &mut self,
        links: &mut L,
        pid: ProcessId,
    ) -> Result<(), KernelError> {
        Self::claim(links, pid, self.head)?;
        if self.tail.is_none() {
            self.tail = Some(pid);
        }
        self.head = Some(pid);
        self.len += 1;
        Ok(())
    }

    /// Remove and return the head of the list.
    pub fn pop_front<L: Links + ?Sized>(&mut self, links: &mut L) -> Option<ProcessId> {
        let head = self.head?;
        let link = links.link_mut(head);
        self.head = link.next.take();
        link.linked = false;
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(head)
    }

    /// Unlink a process from anywhere in the list. Returns whether the
    /// process was found.
    pub fn remove<L: Links + ?Sized>(&mut self, links: &mut L, pid: ProcessId) -> bool {
        let mut previous = None;
        let mut cursor = self.head;

        while let Some(current) = cursor {
            let next = links.link(current).next;
            if current == pid {
                match previous {
                    Some(previous) => links.link_mut(previous).next = next,
                    None => self.head = next,
                }
                if self.tail == Some(current) {
                    self.tail = previous;
                }
                let link = links.link_mut(current);
                link.next = None;
                link.linked = false;
                self.len -= 1;
                return true;
            }
            previous = Some(current);
            cursor = next;
        }
        false
    }

    /// Whether the process is a member of this list.
    #[must_use]
    pub fn contains<L: Links + ?Sized>(&self, links: &L, pid: ProcessId) -> bool {
        self.iter(links).any(|member| member == pid)
    }

    /// Move the head of the list to its tail.
    ///
    /// # Errors
    /// Never fails in practice: the head is unlinked before being pushed
    /// back. The error is propagated for uniformity with the other pushes.
    pub fn rotate<L: Links + ?Sized>(&mut self, links: &mut L) -> Result<(), KernelError> {
        match self.pop_front(links) {
            Some(head) => self.push_back(links, head),
            None => Ok(()),
        }
    }

    /// Iterate over the members of the list, from head to tail.
    pub fn iter<'a, L: Links + ?Sized>(&self, links: &'a L) -> Iter<'a, L> {
        Iter {
            links,
            cursor: self.head,
        }
    }

    fn claim<L: Links + ?Sized>(
        links: &mut L,
        pid: ProcessId,
        next: Option<ProcessId>,
    ) -> Result<(), KernelError> {
        let link = links.link_mut(pid);
        if link.linked {
            log::error!("Process {pid} queued twice");
            return Err(KernelError::InvariantViolation);
        }
        link.linked = true;
        link.next = next;
        Ok(())
    }
}

/// An iterator over the members of a [`List`].
pub struct Iter<'a, L: ?Sized> {
    links: &'a L,
    cursor: Option<ProcessId>,
}

impl<L: Links + ?Sized> Iterator for Iter<'_, L> {
    type Item = ProcessId;

    fn next(&mut self) -> Option<ProcessId> {
        let current = self.cursor?;
        self.cursor = self.links.link(current).next();
        Some(current)
    }
}
