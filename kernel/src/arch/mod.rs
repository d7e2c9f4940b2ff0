use core::fmt;

pub mod irq;

#[cfg(feature = "logging")]
pub mod log;

#[cfg(any(test, feature = "host"))]
pub mod host;

/// An interrupt channel. Channel [`Channel::CLOCK`] is wired to the clock
/// source and reserved for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(u8);

impl Channel {
    /// The channel of the clock interrupt.
    pub const CLOCK: Channel = Channel(config::CLOCK_CHANNEL);

    #[must_use]
    pub const fn new(number: u8) -> Self {
        Self(number)
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// The execution context substrate the kernel runs on: it creates contexts,
/// switches between them and controls interrupt delivery. The kernel never
/// touches the hardware directly, everything goes through this trait.
///
/// Exactly one context runs at any time. The kernel only switches contexts
/// with interrupts masked.
pub trait Substrate: Sync + 'static {
    /// An opaque handle on a suspended or running execution context.
    type Context: Clone + Send + 'static;

    /// Create a context that will call `entry(arg)` on a fresh stack of
    /// `stack_size` bytes the first time it is transferred to. The context
    /// starts with interrupts allowed. Returns `None` if the context could
    /// not be allocated.
    fn new_context<T: Sync + 'static>(
        &self,
        entry: fn(&'static T) -> !,
        arg: &'static T,
        stack_size: usize,
    ) -> Option<Self::Context>;

    /// Suspend the calling context and resume `to`. Returns when another
    /// context transfers back to the caller. Transferring to the running
    /// context must return immediately.
    fn transfer(&self, to: &Self::Context);

    /// Suspend the calling context and resume `to`. The caller is resumed
    /// when an interrupt fires on `channel`, suspending whatever context was
    /// running at that time. The caller resumes with interrupts masked.
    fn io_transfer(&self, to: &Self::Context, channel: Channel);

    /// Mask interrupts. Calls nest: interrupts are only allowed again once
    /// every mask has been matched by a call to
    /// [`allow_interrupts`](Substrate::allow_interrupts).
    fn mask_interrupts(&self);

    /// Undo one [`mask_interrupts`](Substrate::mask_interrupts). Pending
    /// interrupts may be delivered as soon as the last mask is lifted.
    fn allow_interrupts(&self);

    /// Start the periodic clock interrupt on [`Channel::CLOCK`].
    fn init_clock(&self);

    /// Bring up the peripheral interrupt sources.
    fn init_devices(&self);

    /// Wait a bit, with interrupts allowed. This is the body of the idle loop.
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// Stop the whole system. Called after a fatal kernel error.
    fn halt(&self) -> !;
}
