#![no_std]

/// The maximum number of processes that can be created. The kernel uses this
/// constant to size the process table, which is allocated once and never
/// shrinks: processes are never destroyed. The idle process and the scheduler
/// process each take one slot of this table when the kernel starts.
///
/// Diminishing this value will reduce the memory usage of the kernel, but it
/// will also limit the number of application processes.
pub const MAX_PROCESSES: usize = 10;

/// The maximum number of monitors that can be created. This is also the
/// maximum nesting depth of `enter_monitor` calls for a single process, since
/// every process keeps a stack of the monitors it is currently inside.
pub const MAX_MONITORS: usize = 10;

/// The maximum number of events that can be created.
pub const MAX_EVENTS: usize = 10;

/// The size, in bytes, of the stacks allocated for the kernel's own processes
/// (the idle process and the scheduler). Application processes choose their
/// own stack size at creation.
pub const STACK_SIZE: usize = 10_000;

/// The period of the clock interrupt, in milliseconds. Every clock interrupt
/// advances the time-slice accounting and every pending timeout by this
/// amount.
pub const CLOCK_PERIOD: u64 = 1;

/// The number of milliseconds that a process can run before being preempted
/// by the scheduler if it has not yielded the CPU. Once the accumulated time
/// since the last rotation exceeds this value, the ready list is rotated.
pub const TIME_SLICE: u64 = 20;

/// The interrupt channel wired to the clock. This channel is reserved for the
/// scheduler and cannot be awaited by application processes.
pub const CLOCK_CHANNEL: u8 = 0;
