/// The lock guarding the kernel state. It only protects the state against
/// the host threads of a simulated machine: on a target, the interrupt mask
/// already ensures a single context touches the kernel at a time, so the
/// lock is never contended there. It must never be held across a context
/// switch.
pub type Spinlock<T> = spin::Mutex<T>;

/// Exclusive access to the state behind a [`Spinlock`].
pub type SpinlockGuard<'a, T> = spin::MutexGuard<'a, T>;
