pub mod spin;

pub use self::spin::{Spinlock, SpinlockGuard};
