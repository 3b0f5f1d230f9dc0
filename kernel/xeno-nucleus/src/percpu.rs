//! Per-CPU scheduler slot (§3) and the gatekeeper handoff channel (§4.2).
//!
//! The handoff (`gksync`/`gktarget`) is kept outside the `Core`-wide lock
//! deliberately: `gksync.acquire()` blocks, and the concurrency model
//! (§5) forbids holding the global lock across a suspension point unless
//! the suspend primitive itself drops it atomically. Splitting the two
//! means `harden`/`gatekeeper_thread` never have to reason about that.

use bitflags::bitflags;

use crate::rpi::RpiQueue;
use crate::tcb::TcbHandle;
use xeno_core::sync::Semaphore;

/// Identifies one of the nucleus's tracked CPUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PerCpuId(pub u32);

bitflags! {
    /// RPI-related status bits carried on a per-CPU slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RpiStatus: u32 {
        /// This CPU's root surrogate is currently boosted above idle.
        const ROOT_BOOSTED = 1 << 0;
    }
}

/// Per-CPU scheduler state guarded by the `Core`-wide lock: the running
/// TCB, the RPI queue, and RPI status bits.
pub struct PerCpuSlot {
    id: PerCpuId,
    /// The TCB currently running on this CPU, if any.
    pub current: Option<TcbHandle>,
    /// Priority-ordered queue of relaxed real-time threads on this CPU.
    pub rpi_queue: RpiQueue,
    /// RPI-related status bits.
    pub rpi_status: RpiStatus,
}

impl PerCpuSlot {
    /// Creates a fresh, idle per-CPU slot for `id`.
    pub fn new(id: PerCpuId) -> Self {
        Self {
            id,
            current: None,
            rpi_queue: RpiQueue::new(),
            rpi_status: RpiStatus::empty(),
        }
    }

    /// This slot's CPU identifier.
    pub fn id(&self) -> PerCpuId {
        self.id
    }
}

/// The gatekeeper handoff channel for one CPU: a binary semaphore
/// (`gksync`) serializing requests, plus the one-slot handoff register
/// (`gktarget`) naming the next migrant.
///
/// Lives outside the `Core`-wide lock (see module docs).
pub struct GatekeeperChannel {
    /// Serializes gatekeeper handoff requests for this CPU.
    pub gksync: Semaphore,
    /// The thread the gatekeeper should resume next, if any.
    pub gktarget: std::sync::Mutex<Option<TcbHandle>>,
}

impl GatekeeperChannel {
    /// Creates a fresh channel with `gksync` at count 0 (blocked).
    pub fn new() -> Self {
        Self {
            gksync: Semaphore::new(0),
            gktarget: std::sync::Mutex::new(None),
        }
    }
}

impl Default for GatekeeperChannel {
    fn default() -> Self {
        Self::new()
    }
}
