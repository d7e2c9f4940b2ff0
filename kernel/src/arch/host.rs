//! A substrate backed by host threads, used to run the kernel in a normal
//! process and to test it end to end.
//!
//! Every context is an OS thread, but only the thread holding the baton runs:
//! all the others are parked on a condition variable, so the kernel still
//! sees a single logical thread of control. Interrupts are simulated: they
//! can only be delivered at an interrupt window, which opens whenever the
//! running context lifts its last interrupt mask and whenever the idle
//! process relaxes.
//!
//! The clock is virtual. Once [`Substrate::init_clock`] ran, every interrupt
//! window delivers one clock interrupt to the scheduler, so one window stands
//! for one clock period. Device interrupts are raised from outside the
//! simulation with [`HostSubstrate::raise`] and stay pending until a context
//! waits on their channel.
use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use super::{Channel, Substrate};

/// The context of the thread that created the substrate, which is the
/// thread expected to boot the kernel.
const BOOT: usize = 0;

/// Host threads need more stack than the kernel asks for its own processes.
const MIN_STACK_SIZE: usize = 256 * 1024;

thread_local! {
    static CURRENT: Cell<usize> = const { Cell::new(BOOT) };
}

/// A handle on a host context, which is the index of its thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostContext(usize);

#[derive(Debug, Default)]
struct Machine {
    /// The context holding the baton.
    running: usize,

    /// The number of contexts created so far.
    contexts: usize,

    /// The interrupt mask depth of the running context.
    masked: usize,

    /// Whether the clock source was started.
    clock: bool,

    /// Clock interrupts delivered so far.
    ticks: u64,

    /// Device interrupts raised but not delivered yet.
    pending: Vec<Channel>,

    /// Contexts suspended by `io_transfer`, with the channel they wait on.
    blocked: Vec<(Channel, usize)>,
}

impl Machine {
    /// Pick the interrupt to deliver, if any, and return the context it
    /// resumes. Device interrupts go first.
    fn take_interrupt(&mut self) -> Option<usize> {
        let device = self
            .pending
            .iter()
            .position(|channel| self.blocked.iter().any(|(blocked, _)| blocked == channel));
        if let Some(index) = device {
            let channel = self.pending.remove(index);
            return self.unblock(channel);
        }

        if self.clock {
            let scheduler = self.unblock(Channel::CLOCK)?;
            self.ticks += 1;
            return Some(scheduler);
        }
        None
    }

    fn unblock(&mut self, channel: Channel) -> Option<usize> {
        let index = self
            .blocked
            .iter()
            .position(|(blocked, _)| *blocked == channel)?;
        Some(self.blocked.remove(index).1)
    }
}

#[derive(Debug, Default)]
struct Shared {
    machine: Mutex<Machine>,
    turn: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block the calling thread until `me` holds the baton.
    fn wait_turn<'a>(
        &'a self,
        mut machine: MutexGuard<'a, Machine>,
        me: usize,
    ) -> MutexGuard<'a, Machine> {
        while machine.running != me {
            machine = self
                .turn
                .wait(machine)
                .unwrap_or_else(PoisonError::into_inner);
        }
        machine
    }
}

/// The thread-backed substrate.
#[derive(Debug, Default, Clone)]
pub struct HostSubstrate {
    shared: Arc<Shared>,
}

impl HostSubstrate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a device interrupt on `channel`. It is delivered at the next
    /// interrupt window where some context waits on that channel. Raising a
    /// channel that is already pending has no effect.
    pub fn raise(&self, channel: Channel) {
        let mut machine = self.shared.lock();
        if !machine.pending.contains(&channel) {
            machine.pending.push(channel);
        }
    }

    /// The number of clock interrupts delivered so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.shared.lock().ticks
    }

    /// Hand the baton to `to` and wait until it comes back. The caller
    /// resumes with `masked` as its interrupt mask depth.
    fn switch(&self, mut machine: MutexGuard<'_, Machine>, to: usize, masked: usize) {
        let me = CURRENT.get();
        machine.running = to;
        self.shared.turn.notify_all();

        let mut machine = self.shared.wait_turn(machine, me);
        machine.masked = masked;
    }

    /// Deliver one interrupt, if one can be delivered. The interrupted
    /// context is suspended with interrupts allowed, and the resumed one
    /// gets them masked.
    fn window(&self, mut machine: MutexGuard<'_, Machine>) {
        if let Some(target) = machine.take_interrupt() {
            machine.masked = 1;
            self.switch(machine, target, 0);
        }
    }
}

impl Substrate for HostSubstrate {
    type Context = HostContext;

    fn new_context<T: Sync + 'static>(
        &self,
        entry: fn(&'static T) -> !,
        arg: &'static T,
        stack_size: usize,
    ) -> Option<HostContext> {
        let id = {
            let mut machine = self.shared.lock();
            machine.contexts += 1;
            machine.contexts
        };

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(format!("context-{id}"))
            .stack_size(stack_size.max(MIN_STACK_SIZE))
            .spawn(move || {
                CURRENT.set(id);
                let mut machine = shared.wait_turn(shared.lock(), id);
                machine.masked = 0;
                drop(machine);
                entry(arg)
            })
            .ok()?;

        Some(HostContext(id))
    }

    fn transfer(&self, to: &HostContext) {
        let machine = self.shared.lock();
        let masked = machine.masked;
        self.switch(machine, to.0, masked);
    }

    fn io_transfer(&self, to: &HostContext, channel: Channel) {
        let mut machine = self.shared.lock();
        machine.blocked.push((channel, CURRENT.get()));
        let masked = machine.masked;
        self.switch(machine, to.0, masked);
    }

    fn mask_interrupts(&self) {
        self.shared.lock().masked += 1;
    }

    fn allow_interrupts(&self) {
        let mut machine = self.shared.lock();
        machine.masked = machine.masked.saturating_sub(1);
        if machine.masked == 0 && !thread::panicking() {
            self.window(machine);
        }
    }

    fn init_clock(&self) {
        self.shared.lock().clock = true;
        log::debug!("Virtual clock started");
    }

    fn init_devices(&self) {
        log::debug!("Host devices ready");
    }

    fn relax(&self) {
        thread::yield_now();
        let machine = self.shared.lock();
        if machine.masked == 0 {
            self.window(machine);
        }
    }

    fn halt(&self) -> ! {
        panic!("kernel halted");
    }
}

/// A log writer printing to the standard error of the host process.
#[cfg(feature = "logging")]
pub fn stderr(message: &str) {
    std::eprint!("{message}");
}
