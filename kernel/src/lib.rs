//! A cooperative multitasking kernel for single-core targets.
//!
//! Processes share the processor through explicit yields and blocking
//! operations, plus a round-robin time slice enforced by a scheduler process
//! driven by the clock interrupt. Processes synchronise through reentrant
//! monitors with Mesa-style condition variables, timed waits, sleeps, events
//! and interrupt waits.
//!
//! The kernel never touches the hardware itself: it runs on top of a
//! [`Substrate`](arch::Substrate) that creates and switches execution
//! contexts and controls interrupts. The `host` feature provides one backed
//! by host threads.
#![cfg_attr(not(any(test, feature = "host")), no_std)]

pub mod arch;
pub mod error;
pub mod event;
pub mod kernel;
pub mod library;
pub mod list;
pub mod monitor;
pub mod process;
pub mod scheduler;
pub mod system;
pub mod timeout;

pub use arch::{Channel, Substrate};
pub use error::KernelError;
pub use event::EventId;
pub use kernel::Kernel;
pub use monitor::MonitorId;
pub use process::ProcessId;
pub use scheduler::Timing;
pub use system::System;
