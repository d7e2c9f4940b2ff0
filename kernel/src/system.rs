//! The kernel as seen by application code.
//!
//! [`System`] binds the [`Kernel`] state machine to a [`Substrate`]. Every
//! operation masks interrupts, runs the kernel transition under the kernel
//! lock, releases the lock and, if the transition blocked the caller,
//! transfers to the process it designated. The interrupt mask is held across
//! the transfer, so the `finish_*` half of a blocking operation runs before
//! any interrupt can be delivered to the resumed caller.
//!
//! Any kernel error is fatal: it is logged and the system halts.
use crate::arch::irq::{self, Guard};
use crate::arch::{Channel, Substrate};
use crate::error::KernelError;
use crate::event::EventId;
use crate::kernel::{Entry, Kernel};
use crate::library::lock::{Spinlock, SpinlockGuard};
use crate::monitor::MonitorId;
use crate::process::ProcessId;
use crate::scheduler::Timing;

/// The body of a process. It receives the system it runs on and never
/// returns.
pub type Body<S> = fn(&'static System<S>) -> !;

pub struct System<S: Substrate> {
    substrate: S,
    kernel: Spinlock<Kernel<S::Context>>,
}

impl<S: Substrate> System<S> {
    /// Create a system with the timing described by the `config` crate.
    #[must_use]
    pub const fn new(substrate: S) -> Self {
        Self::with_timing(substrate, Timing::DEFAULT)
    }

    #[must_use]
    pub const fn with_timing(substrate: S, timing: Timing) -> Self {
        Self {
            substrate,
            kernel: Spinlock::new(Kernel::new(timing)),
        }
    }

    #[must_use]
    pub const fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Run a closure on the kernel state with interrupts masked. Meant for
    /// diagnostics: the closure must not call back into the system.
    pub fn inspect<R>(&self, f: impl FnOnce(&Kernel<S::Context>) -> R) -> R {
        irq::without(&self.substrate, |masked| f(&self.kernel(masked)))
    }

    /// Create a process running `body` on a stack of `stack_size` bytes and
    /// append it to the ready list. The process first runs when the
    /// scheduler dispatches it.
    pub fn create_process(&'static self, body: Body<S>, stack_size: usize) -> ProcessId {
        let masked = self.critical();
        self.locked(&masked, |kernel| kernel.ensure_capacity());
        let context = self
            .substrate
            .new_context(body, self, stack_size)
            .ok_or(KernelError::ResourceExhausted);
        let context = self.check(context);
        self.locked(&masked, |kernel| kernel.create_process(context))
    }

    /// The running process.
    pub fn current(&self) -> ProcessId {
        irq::without(&self.substrate, |masked| {
            self.locked(masked, |kernel| kernel.current())
        })
    }

    /// Create the idle and scheduler processes and hand the machine over to
    /// the scheduler. Halts if no process was created beforehand.
    pub fn start(&'static self) -> ! {
        log::info!("Starting kernel");
        let masked = self.critical();
        let scheduler = self.check(self.boot(&masked));
        self.substrate.transfer(&scheduler);

        // Nothing ever transfers back to the boot context.
        self.fatal(KernelError::InvariantViolation)
    }

    fn boot(&'static self, masked: &Guard<'_, S>) -> Result<S::Context, KernelError> {
        self.kernel(masked).current()?;

        let idle = self.spawn(masked, Self::idle)?;
        self.kernel(masked).install_idle(idle)?;
        let scheduler = self.spawn(masked, Self::scheduler)?;
        self.kernel(masked).install_scheduler(scheduler)?;

        let kernel = self.kernel(masked);
        let pid = kernel.start()?;
        Ok(kernel.context(pid).clone())
    }

    fn spawn(
        &'static self,
        masked: &Guard<'_, S>,
        body: Body<S>,
    ) -> Result<S::Context, KernelError> {
        self.kernel(masked).ensure_capacity()?;
        self.substrate
            .new_context(body, self, config::STACK_SIZE)
            .ok_or(KernelError::ResourceExhausted)
    }

    /// Give the processor to the next ready process.
    pub fn yield_now(&self) {
        let masked = self.critical();
        let me = self.locked(&masked, |kernel| kernel.current());
        let next = self.locked(&masked, Kernel::yield_now);
        if next != me {
            self.switch_to(&masked, next);
        }
    }

    pub fn create_monitor(&self) -> MonitorId {
        irq::without(&self.substrate, |masked| {
            self.locked(masked, Kernel::create_monitor)
        })
    }

    /// Enter a monitor, blocking while another process holds it.
    pub fn enter_monitor(&self, id: MonitorId) {
        let masked = self.critical();
        if let Entry::Blocked { next } = self.locked(&masked, |kernel| kernel.enter_monitor(id)) {
            self.switch_to(&masked, next);
            self.locked(&masked, |kernel| kernel.finish_enter(id));
        }
    }

    pub fn exit_monitor(&self) {
        irq::without(&self.substrate, |masked| {
            self.locked(masked, Kernel::exit_monitor);
        });
    }

    /// Wait on the condition variable of the innermost monitor.
    pub fn wait(&self) {
        let masked = self.critical();
        let ticket = self.locked(&masked, Kernel::wait);
        self.switch_to(&masked, ticket.next);
        self.locked(&masked, |kernel| kernel.finish_wait(&ticket));
    }

    pub fn notify(&self) {
        irq::without(&self.substrate, |masked| {
            self.locked(masked, Kernel::notify);
        });
    }

    pub fn notify_all(&self) {
        irq::without(&self.substrate, |masked| {
            self.locked(masked, Kernel::notify_all);
        });
    }

    /// Wait on the condition variable of the innermost monitor for at most
    /// `duration` milliseconds. Returns true if the caller was notified and
    /// false if it timed out. Either way, the caller holds the monitor again
    /// when this returns.
    pub fn timed_wait(&self, duration: i64) -> bool {
        let masked = self.critical();
        let ticket = self.locked(&masked, |kernel| kernel.timed_wait(duration));
        self.switch_to(&masked, ticket.next);
        self.locked(&masked, |kernel| kernel.finish_timed_wait(&ticket))
    }

    /// Suspend the caller for `duration` milliseconds.
    pub fn sleep(&self, duration: i64) {
        let masked = self.critical();
        let next = self.locked(&masked, |kernel| kernel.sleep(duration));
        self.switch_to(&masked, next);
        self.locked(&masked, Kernel::finish_sleep);
    }

    /// Suspend the caller until an interrupt fires on `channel`.
    pub fn wait_interrupt(&self, channel: Channel) {
        let masked = self.critical();
        let (me, next) = self.locked(&masked, |kernel| kernel.wait_interrupt(channel));
        let context = self.context_of(&masked, next);
        self.substrate.io_transfer(&context, channel);
        self.locked(&masked, |kernel| kernel.finish_wait_interrupt(me));
    }

    pub fn create_event(&self) -> EventId {
        irq::without(&self.substrate, |masked| {
            self.locked(masked, Kernel::create_event)
        })
    }

    /// Block until the event is triggered. Returns at once if it already was.
    pub fn await_event(&self, id: EventId) {
        let masked = self.critical();
        if let Some(next) = self.locked(&masked, |kernel| kernel.await_event(id)) {
            self.switch_to(&masked, next);
        }
    }

    /// Wake every process awaiting the event, then yield.
    pub fn trigger_event(&self, id: EventId) {
        let masked = self.critical();
        let me = self.locked(&masked, |kernel| kernel.current());
        let next = self.locked(&masked, |kernel| kernel.trigger_event(id));
        if next != me {
            self.switch_to(&masked, next);
        }
    }

    pub fn reset_event(&self, id: EventId) {
        irq::without(&self.substrate, |masked| {
            self.locked(masked, |kernel| kernel.reset_event(id));
        });
    }

    /// The scheduler process. It runs with interrupts masked for its whole
    /// life and is only ever resumed by the clock interrupt.
    fn scheduler(system: &'static Self) -> ! {
        let masked = system.critical();
        system.substrate.init_clock();
        system.substrate.init_devices();
        log::debug!("Scheduler running");

        loop {
            let next = system.locked(&masked, |kernel| kernel.dispatch_target());
            let context = system.context_of(&masked, next);
            system.substrate.io_transfer(&context, Channel::CLOCK);
            system.locked(&masked, Kernel::clock_tick);
        }
    }

    /// The idle process, dispatched when no process is ready.
    fn idle(system: &'static Self) -> ! {
        loop {
            system.substrate.relax();
        }
    }

    fn critical(&self) -> Guard<'_, S> {
        Guard::new(&self.substrate)
    }

    /// The kernel state. Taking the lock requires a mask guard, so no
    /// interrupt can suspend the holder while the lock is held.
    fn kernel(&self, _masked: &Guard<'_, S>) -> SpinlockGuard<'_, Kernel<S::Context>> {
        self.kernel.lock()
    }

    fn switch_to(&self, masked: &Guard<'_, S>, next: ProcessId) {
        let context = self.context_of(masked, next);
        self.substrate.transfer(&context);
    }

    fn context_of(&self, masked: &Guard<'_, S>, pid: ProcessId) -> S::Context {
        self.kernel(masked).context(pid).clone()
    }

    /// Run a kernel transition under the kernel lock. The lock is released
    /// before an error is reported.
    fn locked<R>(
        &self,
        masked: &Guard<'_, S>,
        transition: impl FnOnce(&mut Kernel<S::Context>) -> Result<R, KernelError>,
    ) -> R {
        let result = transition(&mut self.kernel(masked));
        self.check(result)
    }

    fn check<R>(&self, result: Result<R, KernelError>) -> R {
        result.unwrap_or_else(|error| self.fatal(error))
    }

    fn fatal(&self, error: KernelError) -> ! {
        let current = self
            .kernel
            .try_lock()
            .and_then(|kernel| kernel.current().ok());
        match current {
            Some(pid) => log::error!("[{pid}] Error: {error}"),
            None => log::error!("[-] Error: {error}"),
        }
        self.substrate.halt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::HostSubstrate;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    type HostSystem = System<HostSubstrate>;

    const STACK: usize = 64 * 1024;

    /// Build a leaked system, let `setup` create its processes from a boot
    /// thread and start it there.
    fn boot(timing: Timing, setup: fn(&'static HostSystem)) -> &'static HostSystem {
        let system: &'static HostSystem =
            Box::leak(Box::new(System::with_timing(HostSubstrate::new(), timing)));
        thread::spawn(move || {
            setup(system);
            system.start()
        });
        system
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !condition() {
            assert!(Instant::now() < deadline, "simulation timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Leave the ready list for good.
    fn retire(system: &'static HostSystem) -> ! {
        loop {
            system.sleep(i64::MAX);
        }
    }

    const NO_PREEMPTION: Timing = Timing {
        clock_period: 1,
        time_slice: u64::MAX,
    };

    static ROUND_ROBIN: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    fn round_robin(system: &'static HostSystem) -> ! {
        for _ in 0..3 {
            let me = system.current().index();
            ROUND_ROBIN.lock().unwrap().push(me);
            system.yield_now();
        }
        retire(system)
    }

    #[test]
    fn test_yield_runs_processes_in_turn() {
        boot(NO_PREEMPTION, |system| {
            for _ in 0..3 {
                system.create_process(round_robin, STACK);
            }
        });
        wait_until(|| ROUND_ROBIN.lock().unwrap().len() == 9);
        assert_eq!(*ROUND_ROBIN.lock().unwrap(), [0, 1, 2, 0, 1, 2, 0, 1, 2]);
    }

    static INSIDE: AtomicBool = AtomicBool::new(false);
    static OVERLAPS: AtomicUsize = AtomicUsize::new(0);
    static FINISHED: AtomicUsize = AtomicUsize::new(0);

    fn contender(system: &'static HostSystem) -> ! {
        let monitor = MonitorId::from_raw(0);
        for _ in 0..20 {
            system.enter_monitor(monitor);
            system.enter_monitor(monitor);
            if INSIDE.swap(true, Ordering::SeqCst) {
                OVERLAPS.fetch_add(1, Ordering::SeqCst);
            }
            system.yield_now();
            INSIDE.store(false, Ordering::SeqCst);
            system.exit_monitor();
            system.exit_monitor();
        }
        FINISHED.fetch_add(1, Ordering::SeqCst);
        retire(system)
    }

    #[test]
    fn test_monitor_excludes_preempted_contenders() {
        let timing = Timing {
            clock_period: 1,
            time_slice: 2,
        };
        boot(timing, |system| {
            system.create_monitor();
            for _ in 0..3 {
                system.create_process(contender, STACK);
            }
        });
        wait_until(|| FINISHED.load(Ordering::SeqCst) == 3);
        assert_eq!(OVERLAPS.load(Ordering::SeqCst), 0);
    }

    static TIMED_OUT: Mutex<Option<(bool, u64)>> = Mutex::new(None);

    fn lonely_waiter(system: &'static HostSystem) -> ! {
        let monitor = MonitorId::from_raw(0);
        system.enter_monitor(monitor);
        let before = system.substrate().ticks();
        let notified = system.timed_wait(50);
        let elapsed = system.substrate().ticks() - before;
        let holder = system.inspect(|kernel| kernel.monitor(monitor).unwrap().owner());
        assert_eq!(holder, Some(system.current()));
        system.exit_monitor();
        *TIMED_OUT.lock().unwrap() = Some((notified, elapsed));
        retire(system)
    }

    #[test]
    fn test_timed_wait_times_out() {
        boot(Timing::DEFAULT, |system| {
            system.create_monitor();
            system.create_process(lonely_waiter, STACK);
        });
        wait_until(|| TIMED_OUT.lock().unwrap().is_some());
        let (notified, elapsed) = TIMED_OUT.lock().unwrap().unwrap();
        assert!(!notified);
        assert!(elapsed >= 50);
    }

    static NOTIFIED: Mutex<Option<bool>> = Mutex::new(None);

    fn patient_waiter(system: &'static HostSystem) -> ! {
        system.enter_monitor(MonitorId::from_raw(0));
        let notified = system.timed_wait(100_000);
        system.exit_monitor();
        *NOTIFIED.lock().unwrap() = Some(notified);
        retire(system)
    }

    fn notifier(system: &'static HostSystem) -> ! {
        system.enter_monitor(MonitorId::from_raw(0));
        system.notify();
        system.exit_monitor();
        retire(system)
    }

    #[test]
    fn test_timed_wait_notified() {
        boot(Timing::DEFAULT, |system| {
            system.create_monitor();
            system.create_process(patient_waiter, STACK);
            system.create_process(notifier, STACK);
        });
        wait_until(|| NOTIFIED.lock().unwrap().is_some());
        assert_eq!(*NOTIFIED.lock().unwrap(), Some(true));
    }

    static WAKE_ORDER: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    fn long_sleeper(system: &'static HostSystem) -> ! {
        system.sleep(30);
        WAKE_ORDER.lock().unwrap().push(system.current().index());
        retire(system)
    }

    fn short_sleeper(system: &'static HostSystem) -> ! {
        system.sleep(10);
        WAKE_ORDER.lock().unwrap().push(system.current().index());
        retire(system)
    }

    #[test]
    fn test_sleepers_wake_by_deadline() {
        boot(Timing::DEFAULT, |system| {
            system.create_process(long_sleeper, STACK);
            system.create_process(short_sleeper, STACK);
        });
        wait_until(|| WAKE_ORDER.lock().unwrap().len() == 2);
        assert_eq!(*WAKE_ORDER.lock().unwrap(), [1, 0]);
    }

    const DEVICE: Channel = Channel::new(3);
    static INTERRUPTED: Mutex<Option<usize>> = Mutex::new(None);

    fn driver(system: &'static HostSystem) -> ! {
        system.wait_interrupt(DEVICE);
        *INTERRUPTED.lock().unwrap() = Some(system.current().index());
        retire(system)
    }

    #[test]
    fn test_wait_interrupt_resumes_on_raise() {
        let system = boot(Timing::DEFAULT, |system| {
            system.create_process(driver, STACK);
        });
        system.substrate().raise(DEVICE);
        wait_until(|| INTERRUPTED.lock().unwrap().is_some());
        assert_eq!(*INTERRUPTED.lock().unwrap(), Some(0));
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Triggering,
        Woken,
    }

    static EVENT_STEPS: Mutex<Vec<Step>> = Mutex::new(Vec::new());

    fn event_waiter(system: &'static HostSystem) -> ! {
        system.await_event(EventId::from_raw(0));
        EVENT_STEPS.lock().unwrap().push(Step::Woken);
        retire(system)
    }

    fn event_trigger(system: &'static HostSystem) -> ! {
        EVENT_STEPS.lock().unwrap().push(Step::Triggering);
        system.trigger_event(EventId::from_raw(0));
        retire(system)
    }

    #[test]
    fn test_trigger_releases_awaiting_process() {
        boot(NO_PREEMPTION, |system| {
            system.create_event();
            system.create_process(event_waiter, STACK);
            system.create_process(event_trigger, STACK);
        });
        wait_until(|| EVENT_STEPS.lock().unwrap().len() == 2);
        assert_eq!(*EVENT_STEPS.lock().unwrap(), [Step::Triggering, Step::Woken]);
    }

    /// A substrate that never switches contexts and only counts how deep
    /// interrupts are masked.
    #[derive(Default)]
    struct Counting {
        depth: AtomicUsize,
        masks: AtomicUsize,
    }

    impl Counting {
        fn depth(&self) -> usize {
            self.depth.load(Ordering::SeqCst)
        }

        fn masks(&self) -> usize {
            self.masks.load(Ordering::SeqCst)
        }
    }

    impl Substrate for Counting {
        type Context = ();

        fn new_context<T: Sync + 'static>(
            &self,
            _entry: fn(&'static T) -> !,
            _arg: &'static T,
            _stack_size: usize,
        ) -> Option<()> {
            Some(())
        }

        fn transfer(&self, _to: &()) {}

        fn io_transfer(&self, _to: &(), _channel: Channel) {}

        fn mask_interrupts(&self) {
            self.masks.fetch_add(1, Ordering::SeqCst);
            self.depth.fetch_add(1, Ordering::SeqCst);
        }

        fn allow_interrupts(&self) {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }

        fn init_clock(&self) {}

        fn init_devices(&self) {}

        fn halt(&self) -> ! {
            panic!("kernel halted");
        }
    }

    fn never_dispatched(_system: &'static System<Counting>) -> ! {
        panic!("a counting substrate never runs processes");
    }

    #[test]
    fn test_application_calls_mask_interrupts() {
        let system: &'static System<Counting> =
            Box::leak(Box::new(System::new(Counting::default())));
        let counting = system.substrate();
        let pid = system.create_process(never_dispatched, STACK);

        // Each call must mask at least once, balance its masks and leave the
        // kernel lock free.
        let masked_call = |call: &dyn Fn()| {
            let before = counting.masks();
            call();
            assert!(counting.masks() > before);
            assert_eq!(counting.depth(), 0);
            assert!(!system.kernel.is_locked());
        };

        masked_call(&|| assert_eq!(system.current(), pid));
        let monitor = system.create_monitor();
        masked_call(&|| system.enter_monitor(monitor));
        masked_call(&|| system.notify());
        masked_call(&|| system.notify_all());
        masked_call(&|| system.exit_monitor());
        masked_call(&|| system.yield_now());
        let event = system.create_event();
        masked_call(&|| system.trigger_event(event));
        masked_call(&|| system.await_event(event));
        masked_call(&|| system.reset_event(event));

        assert_eq!(system.inspect(|_| counting.depth()), 1);
        assert_eq!(counting.depth(), 0);
    }

    #[test]
    fn test_kernel_lock_is_only_taken_masked() {
        let system: &'static System<Counting> =
            Box::leak(Box::new(System::new(Counting::default())));
        let masked = system.critical();
        let depth = system.locked(&masked, |kernel| {
            kernel.create_monitor()?;
            Ok(system.substrate().depth())
        });
        assert_eq!(depth, 1);
        drop(masked);
        assert_eq!(system.substrate().depth(), 0);
    }

    fn unreachable_body(system: &'static HostSystem) -> ! {
        retire(system)
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_process_table_exhaustion_halts() {
        let system: &'static HostSystem =
            Box::leak(Box::new(System::new(HostSubstrate::new())));
        for _ in 0..=config::MAX_PROCESSES {
            system.create_process(unreachable_body, STACK);
        }
    }

    #[test]
    #[should_panic(expected = "kernel halted")]
    fn test_start_without_processes_halts() {
        let system: &'static HostSystem =
            Box::leak(Box::new(System::new(HostSubstrate::new())));
        system.start();
    }
}
