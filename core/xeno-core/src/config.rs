//! Compile-time configuration for the nucleus.
//!
//! These tunables are plain associated constants rather than build-script
//! generated values — there is no code generator here, just a single
//! source of truth for the sizes and thresholds below.

/// Maximum number of CPUs the nucleus tracks per-CPU state for.
pub const MAX_CPUS: usize = 64;

/// Maximum number of skins (interfaces) that may be registered at once.
pub const MAX_SKINS: usize = 16;

/// Number of slots in each CPU's low-stage request ring.
pub const LOSTAGE_RING_SIZE: usize = 128;

/// Watchdog threshold, in milliseconds, before a primary-mode thread is
/// mayday'd for running too long without yielding.
pub const WATCHDOG_THRESHOLD_MS: u64 = 1_000;

/// Highest `SCHED_FIFO` priority a relaxed thread's priority may be mapped
/// into on the host side; priority 0 maps to `SCHED_OTHER` instead.
pub const HOST_FIFO_MAX: u32 = 99;
