//! The kernel state and every kernel operation, written as explicit state
//! transitions. Nothing in this module switches contexts: operations that
//! block return the process to dispatch next, and the blocked caller runs the
//! matching `finish_*` transition once it is resumed.
//!
//! Each operation acts on behalf of the current process, which is the head of
//! the ready list.
use crate::arch::Channel;
use crate::error::KernelError;
use crate::event::{Event, EventId};
use crate::list::{Iter, List};
use crate::monitor::{Holder, Monitor, MonitorId};
use crate::process::{Process, ProcessId, ProcessTable};
use crate::scheduler::{TimeSlice, Timing};
use crate::timeout::TimeoutTracker;

/// The result of an attempt to enter a monitor.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// The caller now holds the monitor.
    Acquired,

    /// The monitor is held by another process. The caller was moved to the
    /// entry queue of the monitor and `next` must be dispatched.
    Blocked { next: ProcessId },
}

/// What a process blocked in `wait` needs to restore its hold on the monitor
/// once it is resumed.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTicket {
    /// The waiting process.
    pub caller: ProcessId,

    /// The monitor waited on.
    pub monitor: MonitorId,

    /// The nesting depth of the caller before the wait.
    pub depth: usize,

    /// The process to dispatch while the caller waits.
    pub next: ProcessId,
}

/// The whole state of the kernel: process, monitor and event tables, the ready
/// list, the timeout tracker and the time-slice accounting.
///
/// The `C` parameter is the execution context type of the substrate. The
/// kernel only stores contexts and hands them back, it never uses them.
pub struct Kernel<C> {
    processes: ProcessTable<C>,
    monitors: heapless::Vec<Monitor, { config::MAX_MONITORS }>,
    events: heapless::Vec<Event, { config::MAX_EVENTS }>,

    /// The runnable processes. Its head is the running process.
    ready: List,

    timeouts: TimeoutTracker,
    slice: TimeSlice,
    timing: Timing,

    idle: Option<ProcessId>,
    scheduler: Option<ProcessId>,
}

impl<C> Kernel<C> {
    #[must_use]
    pub const fn new(timing: Timing) -> Self {
        Self {
            processes: ProcessTable::new(),
            monitors: heapless::Vec::new(),
            events: heapless::Vec::new(),
            ready: List::new(),
            timeouts: TimeoutTracker::new(),
            slice: TimeSlice::new(timing.time_slice),
            timing,
            idle: None,
            scheduler: None,
        }
    }

    /// Register a new application process and append it to the ready list.
    ///
    /// # Errors
    /// Returns [`KernelError::ResourceExhausted`] if the process table is full.
    pub fn create_process(&mut self, context: C) -> Result<ProcessId, KernelError> {
        let pid = self.processes.insert(Process::new(context))?;
        self.ready.push_back(&mut self.processes, pid)?;
        log::debug!("Process {pid} created");
        Ok(pid)
    }

    /// Check that one more process fits in the process table, so that the
    /// caller does not allocate a context for nothing.
    ///
    /// # Errors
    /// Returns [`KernelError::ResourceExhausted`] if the process table is full.
    pub fn ensure_capacity(&self) -> Result<(), KernelError> {
        if self.processes.is_full() {
            return Err(KernelError::ResourceExhausted);
        }
        Ok(())
    }

    /// Register the idle process. It never enters the ready list and is
    /// dispatched whenever the ready list is empty.
    ///
    /// # Errors
    /// Returns [`KernelError::ResourceExhausted`] if the process table is full
    /// and [`KernelError::InvariantViolation`] if the idle process exists.
    pub fn install_idle(&mut self, context: C) -> Result<ProcessId, KernelError> {
        if self.idle.is_some() {
            return Err(KernelError::InvariantViolation);
        }
        let pid = self.processes.insert(Process::new(context))?;
        self.idle = Some(pid);
        Ok(pid)
    }

    /// Register the scheduler process. It is only ever entered by a transfer,
    /// and never enters the ready list.
    ///
    /// # Errors
    /// Returns [`KernelError::ResourceExhausted`] if the process table is full
    /// and [`KernelError::InvariantViolation`] if the scheduler exists.
    pub fn install_scheduler(&mut self, context: C) -> Result<ProcessId, KernelError> {
        if self.scheduler.is_some() {
            return Err(KernelError::InvariantViolation);
        }
        let pid = self.processes.insert(Process::new(context))?;
        self.scheduler = Some(pid);
        Ok(pid)
    }

    /// Check that the kernel can start and return the scheduler process,
    /// which must be transferred to.
    ///
    /// # Errors
    /// Returns [`KernelError::NoReadyProcess`] if no application process was
    /// created and [`KernelError::InvariantViolation`] if the idle or the
    /// scheduler process is missing.
    pub fn start(&self) -> Result<ProcessId, KernelError> {
        self.current()?;
        self.idle.ok_or(KernelError::InvariantViolation)?;
        self.scheduler.ok_or(KernelError::InvariantViolation)
    }

    /// The running process, which is the head of the ready list.
    ///
    /// # Errors
    /// Returns [`KernelError::NoReadyProcess`] if the ready list is empty.
    pub fn current(&self) -> Result<ProcessId, KernelError> {
        self.ready.head().ok_or(KernelError::NoReadyProcess)
    }

    /// The process the scheduler dispatches: the head of the ready list, or
    /// the idle process if the ready list is empty.
    ///
    /// # Errors
    /// Returns [`KernelError::NoReadyProcess`] if the ready list is empty and
    /// the idle process has not been installed yet.
    pub fn dispatch_target(&self) -> Result<ProcessId, KernelError> {
        self.ready
            .head()
            .or(self.idle)
            .ok_or(KernelError::NoReadyProcess)
    }

    /// The execution context of a process.
    ///
    /// # Panics
    /// Panics if the identifier was not handed out by this kernel.
    #[must_use]
    pub fn context(&self, pid: ProcessId) -> &C {
        self.processes[pid].context()
    }

    #[must_use]
    pub fn process(&self, pid: ProcessId) -> Option<&Process<C>> {
        self.processes.get(pid)
    }

    #[must_use]
    pub const fn processes(&self) -> &ProcessTable<C> {
        &self.processes
    }

    #[must_use]
    pub fn monitor(&self, id: MonitorId) -> Option<&Monitor> {
        self.monitors.get(id.index())
    }

    #[must_use]
    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.index())
    }

    /// The ready list, from the running process to the last runnable one.
    pub fn ready(&self) -> Iter<'_, ProcessTable<C>> {
        self.ready.iter(&self.processes)
    }

    #[must_use]
    pub const fn idle(&self) -> Option<ProcessId> {
        self.idle
    }

    #[must_use]
    pub const fn scheduler(&self) -> Option<ProcessId> {
        self.scheduler
    }

    /// Move the running process to the tail of the ready list and return the
    /// new head.
    ///
    /// # Errors
    /// Returns [`KernelError::NoReadyProcess`] if the ready list is empty.
    pub fn yield_now(&mut self) -> Result<ProcessId, KernelError> {
        self.current()?;
        self.ready.rotate(&mut self.processes)?;
        self.current()
    }

    /// # Errors
    /// Returns [`KernelError::ResourceExhausted`] if the monitor table is full.
    pub fn create_monitor(&mut self) -> Result<MonitorId, KernelError> {
        let id = MonitorId::new(self.monitors.len());
        self.monitors
            .push(Monitor::new())
            .map_err(|_| KernelError::ResourceExhausted)?;
        log::debug!("Monitor {id} created");
        Ok(id)
    }

    /// Enter a monitor. Entering a free monitor, or a monitor already held by
    /// the caller, never blocks.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidMonitor`] for an unknown monitor and
    /// [`KernelError::TooManyNestedMonitors`] if the caller's monitor stack
    /// is full.
    pub fn enter_monitor(&mut self, id: MonitorId) -> Result<Entry, KernelError> {
        let me = self.current()?;
        let index = self.monitor_index(id)?;
        if self.processes[me].monitors.is_full() {
            return Err(KernelError::TooManyNestedMonitors);
        }

        let monitor = &mut self.monitors[index];
        match monitor.holder {
            Some(holder) if holder.pid != me => {
                self.ready.pop_front(&mut self.processes);
                monitor.entry.push_back(&mut self.processes, me)?;
                log::trace!("[{me}] Blocked on monitor {id} held by {}", holder.pid);
                return Ok(Entry::Blocked {
                    next: self.dispatch_target()?,
                });
            }
            Some(holder) => {
                monitor.holder = Some(Holder {
                    depth: holder.depth + 1,
                    ..holder
                });
            }
            None => monitor.grant(me),
        }

        self.push_monitor(me, id)?;
        Ok(Entry::Acquired)
    }

    /// Complete an `enter_monitor` that blocked, once the caller runs again.
    /// Ownership must have been handed over to the caller by the process that
    /// released the monitor.
    ///
    /// # Errors
    /// Returns [`KernelError::InvariantViolation`] if the caller does not hold
    /// the monitor exactly once.
    pub fn finish_enter(&mut self, id: MonitorId) -> Result<(), KernelError> {
        let me = self.current()?;
        let index = self.monitor_index(id)?;
        self.check_handed_over(me, index)?;
        self.push_monitor(me, id)
    }

    /// Leave the innermost monitor of the caller. When the last nested hold is
    /// released, the monitor goes straight to the head of its entry queue, or
    /// becomes free if nobody is waiting to enter.
    ///
    /// # Errors
    /// Returns [`KernelError::NotInMonitor`] if the caller is not in a monitor.
    pub fn exit_monitor(&mut self) -> Result<(), KernelError> {
        let me = self.current()?;
        let id = self.processes[me]
            .monitors
            .pop()
            .ok_or(KernelError::NotInMonitor)?;

        let monitor = &mut self.monitors[id.index()];
        let holder = monitor
            .holder
            .filter(|holder| holder.pid == me)
            .ok_or(KernelError::InvariantViolation)?;

        if holder.depth > 1 {
            monitor.holder = Some(Holder {
                depth: holder.depth - 1,
                ..holder
            });
            Ok(())
        } else {
            self.release(id)
        }
    }

    /// Block the caller on the condition variable of its innermost monitor.
    /// The monitor is released as by `exit_monitor`, whatever the nesting
    /// depth, but stays on the caller's monitor stack.
    ///
    /// # Errors
    /// Returns [`KernelError::NotInMonitor`] if the caller does not hold a
    /// monitor.
    pub fn wait(&mut self) -> Result<WaitTicket, KernelError> {
        let me = self.current()?;
        let (monitor, holder) = self.held_monitor(me)?;

        self.ready.pop_front(&mut self.processes);
        self.monitors[monitor.index()]
            .waiting
            .push_back(&mut self.processes, me)?;
        self.release(monitor)?;
        log::trace!("[{me}] Waiting on monitor {monitor}");

        Ok(WaitTicket {
            caller: me,
            monitor,
            depth: holder.depth,
            next: self.dispatch_target()?,
        })
    }

    /// Complete a `wait` once the caller runs again, restoring the nesting
    /// depth it had before waiting.
    ///
    /// # Errors
    /// Returns [`KernelError::InvariantViolation`] if the caller is not the
    /// process that waited or was not handed the monitor back.
    pub fn finish_wait(&mut self, ticket: &WaitTicket) -> Result<(), KernelError> {
        let me = self.current()?;
        if me != ticket.caller {
            return Err(KernelError::InvariantViolation);
        }
        let index = self.monitor_index(ticket.monitor)?;
        self.check_handed_over(me, index)?;
        self.monitors[index].holder = Some(Holder {
            pid: me,
            depth: ticket.depth,
        });
        Ok(())
    }

    /// Move the first waiter of the caller's innermost monitor to its entry
    /// queue. The caller keeps the monitor and keeps running.
    ///
    /// # Errors
    /// Returns [`KernelError::NotInMonitor`] if the caller does not hold a
    /// monitor.
    pub fn notify(&mut self) -> Result<(), KernelError> {
        let me = self.current()?;
        let (monitor, _) = self.held_monitor(me)?;
        self.wake_waiter(monitor)?;
        Ok(())
    }

    /// Move every waiter of the caller's innermost monitor to its entry
    /// queue, in waiting order.
    ///
    /// # Errors
    /// Returns [`KernelError::NotInMonitor`] if the caller does not hold a
    /// monitor.
    pub fn notify_all(&mut self) -> Result<(), KernelError> {
        let me = self.current()?;
        let (monitor, _) = self.held_monitor(me)?;
        while self.wake_waiter(monitor)? {}
        Ok(())
    }

    /// Wait on the innermost monitor for at most `duration` milliseconds.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidTimeout`] for a negative duration and
    /// [`KernelError::NotInMonitor`] if the caller does not hold a monitor.
    pub fn timed_wait(&mut self, duration: i64) -> Result<WaitTicket, KernelError> {
        let duration = u64::try_from(duration).map_err(|_| KernelError::InvalidTimeout)?;
        let ticket = self.wait()?;
        self.timeouts
            .arm(&mut self.processes, ticket.caller, duration)?;
        Ok(ticket)
    }

    /// Complete a `timed_wait`. Returns true if the caller was notified and
    /// false if the timeout expired first.
    ///
    /// # Errors
    /// Same as [`Kernel::finish_wait`].
    pub fn finish_timed_wait(&mut self, ticket: &WaitTicket) -> Result<bool, KernelError> {
        self.finish_wait(ticket)?;
        let notified = !self.processes[ticket.caller].awaiting_timeout;
        self.timeouts.disarm(&mut self.processes, ticket.caller);
        Ok(notified)
    }

    /// Take the caller off the ready list for `duration` milliseconds. Only
    /// the timeout scan puts it back.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidTimeout`] for a negative duration.
    pub fn sleep(&mut self, duration: i64) -> Result<ProcessId, KernelError> {
        let duration = u64::try_from(duration).map_err(|_| KernelError::InvalidTimeout)?;
        let me = self.current()?;
        self.ready.pop_front(&mut self.processes);
        self.timeouts.arm(&mut self.processes, me, duration)?;
        log::trace!("[{me}] Sleeping for {duration} ms");
        self.dispatch_target()
    }

    /// Complete a `sleep` once the caller runs again.
    ///
    /// # Errors
    /// Returns [`KernelError::NoReadyProcess`] if called with an empty ready
    /// list.
    pub fn finish_sleep(&mut self) -> Result<(), KernelError> {
        let me = self.current()?;
        self.timeouts.disarm(&mut self.processes, me);
        Ok(())
    }

    /// Take the caller off the ready list until an interrupt fires on
    /// `channel`. Returns the caller and the process to dispatch meanwhile.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidChannel`] for the clock channel.
    pub fn wait_interrupt(
        &mut self,
        channel: Channel,
    ) -> Result<(ProcessId, ProcessId), KernelError> {
        if channel == Channel::CLOCK {
            return Err(KernelError::InvalidChannel);
        }
        let me = self
            .ready
            .pop_front(&mut self.processes)
            .ok_or(KernelError::NoReadyProcess)?;
        log::trace!("[{me}] Waiting for interrupt {channel}");
        Ok((me, self.dispatch_target()?))
    }

    /// Complete a `wait_interrupt`: the interrupted caller runs again, so it
    /// goes back to the head of the ready list.
    ///
    /// # Errors
    /// Returns [`KernelError::InvariantViolation`] if the caller is queued
    /// somewhere.
    pub fn finish_wait_interrupt(&mut self, caller: ProcessId) -> Result<(), KernelError> {
        self.ready.push_front(&mut self.processes, caller)
    }

    /// # Errors
    /// Returns [`KernelError::ResourceExhausted`] if the event table is full.
    pub fn create_event(&mut self) -> Result<EventId, KernelError> {
        let id = EventId::new(self.events.len());
        self.events
            .push(Event::new())
            .map_err(|_| KernelError::ResourceExhausted)?;
        log::debug!("Event {id} created");
        Ok(id)
    }

    /// Wait for an event to be triggered. Returns `None` if it already was,
    /// otherwise the caller is queued on the event and the process to
    /// dispatch is returned.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidEvent`] for an unknown event and
    /// [`KernelError::EventInMonitor`] if the caller is inside a monitor.
    pub fn await_event(&mut self, id: EventId) -> Result<Option<ProcessId>, KernelError> {
        let index = self.event_index(id)?;
        let me = self.current()?;
        if self.processes[me].monitor_depth() > 0 {
            return Err(KernelError::EventInMonitor);
        }

        let event = &mut self.events[index];
        if event.has_happened() {
            return Ok(None);
        }
        self.ready.pop_front(&mut self.processes);
        event.waiting.push_back(&mut self.processes, me)?;
        log::trace!("[{me}] Awaiting event {id}");
        self.dispatch_target().map(Some)
    }

    /// Trigger an event: every process awaiting it becomes ready, then the
    /// caller yields. Returns the process to dispatch.
    ///
    /// # Errors
    /// Returns [`KernelError::InvalidEvent`] for an unknown event.
    pub fn trigger_event(&mut self, id: EventId) -> Result<ProcessId, KernelError> {
        let index = self.event_index(id)?;
        let event = &mut self.events[index];
        event.happened = true;
        while let Some(pid) = event.waiting.pop_front(&mut self.processes) {
            self.ready.push_back(&mut self.processes, pid)?;
        }
        self.yield_now()
    }

    /// # Errors
    /// Returns [`KernelError::InvalidEvent`] for an unknown event.
    pub fn reset_event(&mut self, id: EventId) -> Result<(), KernelError> {
        let index = self.event_index(id)?;
        self.events[index].happened = false;
        Ok(())
    }

    /// Account for one clock interrupt: rotate the ready list once the time
    /// slice is exhausted, then advance every pending timeout and wake the
    /// processes whose timeout expired.
    ///
    /// # Errors
    /// Returns [`KernelError::InvariantViolation`] if an expired process is
    /// found queued somewhere it should not be.
    pub fn clock_tick(&mut self) -> Result<(), KernelError> {
        let period = self.timing.clock_period;
        if self.slice.advance(period) {
            self.ready.rotate(&mut self.processes)?;
            log::trace!("Time slice over, rotating to {:?}", self.ready.head());
        }

        for pid in self.timeouts.advance(&mut self.processes, period) {
            self.expire(pid)?;
        }
        Ok(())
    }

    /// Wake a process whose timeout expired. A process in a timed wait is
    /// pulled out of the wait queue and competes for the monitor like a
    /// notified process would, except that it is granted the monitor at
    /// once if nobody holds it. A sleeping process goes back to the ready
    /// list.
    fn expire(&mut self, pid: ProcessId) -> Result<(), KernelError> {
        if let Some(id) = self.processes[pid].current_monitor() {
            let monitor = &mut self.monitors[id.index()];
            if !monitor.is_held_by(pid) && monitor.waiting.remove(&mut self.processes, pid) {
                log::trace!("[{pid}] Timed wait on monitor {id} expired");
                if monitor.is_free() {
                    monitor.grant(pid);
                    return self.ready.push_back(&mut self.processes, pid);
                }
                return monitor.entry.push_back(&mut self.processes, pid);
            }
        }
        log::trace!("[{pid}] Sleep expired");
        self.ready.push_back(&mut self.processes, pid)
    }

    /// Release a monitor whose last hold was given up: hand it over to the
    /// first process of the entry queue, or mark it free.
    fn release(&mut self, id: MonitorId) -> Result<(), KernelError> {
        let monitor = &mut self.monitors[id.index()];
        match monitor.entry.pop_front(&mut self.processes) {
            Some(next) => {
                monitor.grant(next);
                self.ready.push_back(&mut self.processes, next)?;
                log::trace!("Monitor {id} handed over to {next}");
            }
            None => monitor.holder = None,
        }
        Ok(())
    }

    /// Move the first waiter of a monitor to its entry queue. A notified
    /// process no longer awaits its timeout.
    fn wake_waiter(&mut self, id: MonitorId) -> Result<bool, KernelError> {
        let monitor = &mut self.monitors[id.index()];
        let Some(pid) = monitor.waiting.pop_front(&mut self.processes) else {
            return Ok(false);
        };
        monitor.entry.push_back(&mut self.processes, pid)?;
        self.timeouts.disarm(&mut self.processes, pid);
        log::trace!("[{pid}] Notified on monitor {id}");
        Ok(true)
    }

    /// The innermost monitor of a process, which it must hold.
    fn held_monitor(&self, pid: ProcessId) -> Result<(MonitorId, Holder), KernelError> {
        let id = self.processes[pid]
            .current_monitor()
            .ok_or(KernelError::NotInMonitor)?;
        let holder = self.monitors[id.index()]
            .holder
            .filter(|holder| holder.pid == pid)
            .ok_or(KernelError::NotInMonitor)?;
        Ok((id, holder))
    }

    fn check_handed_over(&self, pid: ProcessId, index: usize) -> Result<(), KernelError> {
        if self.monitors[index].holder != Some(Holder { pid, depth: 1 }) {
            log::error!("[{pid}] Resumed without holding monitor {index}");
            return Err(KernelError::InvariantViolation);
        }
        Ok(())
    }

    fn push_monitor(&mut self, pid: ProcessId, id: MonitorId) -> Result<(), KernelError> {
        self.processes[pid]
            .monitors
            .push(id)
            .map_err(|_| KernelError::TooManyNestedMonitors)
    }

    fn monitor_index(&self, id: MonitorId) -> Result<usize, KernelError> {
        if id.index() < self.monitors.len() {
            Ok(id.index())
        } else {
            Err(KernelError::InvalidMonitor)
        }
    }

    fn event_index(&self, id: EventId) -> Result<usize, KernelError> {
        if id.index() < self.events.len() {
            Ok(id.index())
        } else {
            Err(KernelError::InvalidEvent)
        }
    }
}

impl<C> Default for Kernel<C> {
    fn default() -> Self {
        Self::new(Timing::DEFAULT)
    }
}
