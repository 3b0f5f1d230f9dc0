//! Thread Control Blocks and the TCB arena/registry.
//!
//! A TCB and its per-CPU scheduler slot naturally reference each other; a
//! raw pointer cycle would need unsafe code to express safely in Rust.
//! Instead, TCBs live in an arena and are addressed through an indexed
//! back-reference (`TcbHandle { index, generation }`): detaching a TCB at
//! task-exit increments its slot's generation, so any handle still held
//! by stale code becomes detectably invalid rather than dangling.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::percpu::PerCpuId;
use crate::ppd::ProcessId;
use crate::skin::MagicId;
use xeno_core::error::CoreError;

bitflags! {
    /// TCB state bitmask (§3: primary/relaxed, dormant/started, ...).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadState: u32 {
        /// Running under the host (relaxed/secondary) scheduler.
        const RELAXED = 1 << 0;
        /// Not yet started.
        const DORMANT = 1 << 1;
        /// Has been started at least once.
        const STARTED = 1 << 2;
        /// Suspended (blocked on a synch object, sleep, etc).
        const SUSPENDED = 1 << 3;
        /// Held (explicitly stopped, e.g. debugger).
        const HELD = 1 << 4;
        /// On a ready queue.
        const READY = 1 << 5;
        /// Waiting out a bounded delay.
        const PENDING_DELAY = 1 << 6;
        /// Mapped to a host task (a "shadow", as opposed to a pure RT thread).
        const MAPPED = 1 << 7;
        /// The FPU context is enabled for this thread.
        const FP_ENABLED = 1 << 8;
        /// Under ptrace-like debug control.
        const DEBUG = 1 << 9;
        /// Trap-on-switch: deliver `SIGDEBUG` on the next relax.
        const TRAP_ON_SWITCH = 1 << 10;
        /// Opted out of RPI tracking: never boosts the root surrogate.
        const RPI_OFF = 1 << 11;
    }
}

bitflags! {
    /// TCB info bitmask: transient signals distinct from steady `ThreadState`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoFlags: u32 {
        /// Marked for forced relax (mayday armed, or cancel requested).
        const KICKED = 1 << 0;
        /// Woken from an abortable wait by an external break request.
        const BREAK = 1 << 1;
        /// The wait that woke this thread timed out.
        const TIMED_OUT = 1 << 2;
        /// A new priority is pending delivery to the host side.
        const PRIORITY_SET = 1 << 3;
        /// A new CPU affinity is pending delivery to the host side.
        const AFFINITY_SET = 1 << 4;
        /// An atomic harden/relax switch is in flight (see invariant 1).
        const ATOMIC = 1 << 5;
    }
}

/// Scheduling class, used by the RPI tracker's SCHED_FIFO/SCHED_OTHER mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedClass {
    /// Real-time, priority-preemptive (maps to the host's `SCHED_FIFO`).
    Fifo,
    /// No real-time guarantees (maps to the host's `SCHED_OTHER`).
    Other,
}

/// Per-class runtime statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcbStats {
    /// Number of primary<->relaxed mode switches.
    pub mode_switches: u64,
    /// Number of real-time context switches.
    pub context_switches: u64,
    /// Number of page faults observed while in primary mode.
    pub page_faults: u64,
    /// Number of syscalls dispatched for this thread.
    pub syscalls: u64,
    /// Accumulated execution time, in nanoseconds.
    pub exec_time_ns: u64,
    /// Timestamp of the last mode switch, in nanoseconds since boot.
    pub last_switch_ns: u64,
}

/// A host-OS task identity. Opaque to the nucleus beyond equality/hashing;
/// the concrete [`Host`](crate::host::Host) implementation owns the real
/// thread/process underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostTaskId(pub u64);

/// A real-time thread control block, mated to exactly one host-OS task.
pub struct Tcb {
    /// Which skin owns this thread.
    pub magic: MagicId,
    /// The process this thread's host task belongs to, for the
    /// cleanup hook's PPD sweep (§4.8 "cleanup (mm drop)").
    pub process: ProcessId,
    /// The mated host-OS task.
    pub host_task: HostTaskId,
    /// Steady-state bitmask.
    pub state: ThreadState,
    /// Transient info bitmask.
    pub info: InfoFlags,
    /// Current (possibly boosted) priority.
    pub priority: u32,
    /// Priority absent any boosting.
    pub base_priority: u32,
    /// Scheduling class.
    pub sched_class: SchedClass,
    /// CPU affinity mask (bit N = may run on CPU N).
    pub affinity: u64,
    /// Back-pointer to the per-CPU scheduler slot this TCB is assigned to.
    pub cpu: PerCpuId,
    /// `true` if this TCB is currently linked on its CPU's RPI queue.
    pub rpi_linked: bool,
    /// Runtime statistics.
    pub stats: TcbStats,
}

impl Tcb {
    /// `true` if currently in primary (real-time) mode.
    pub fn is_primary(&self) -> bool {
        !self.state.contains(ThreadState::RELAXED)
    }
}

/// A generation-checked handle into the [`TcbArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcbHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    tcb: Option<Tcb>,
}

/// Arena owning every live TCB, addressed by generation-checked handles.
///
/// Detaching a TCB (task-exit) bumps its slot's generation and returns the
/// index to the free list, so a stale [`TcbHandle`] held elsewhere resolves
/// to `None` rather than a dangling or (worse) silently reused TCB.
#[derive(Default)]
pub struct TcbArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl TcbArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new TCB, returning its handle.
    pub fn insert(&mut self, tcb: Tcb) -> TcbHandle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.tcb = Some(tcb);
            TcbHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                tcb: Some(tcb),
            });
            TcbHandle {
                index,
                generation: 0,
            }
        }
    }

    /// Removes the TCB addressed by `handle`, bumping its slot's generation.
    pub fn remove(&mut self, handle: TcbHandle) -> Option<Tcb> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let tcb = slot.tcb.take();
        slot.generation = slot.generation.wrapping_add(1);
        if tcb.is_some() {
            self.free.push(handle.index);
        }
        tcb
    }

    /// Borrows the TCB addressed by `handle`, if it is still live.
    pub fn get(&self, handle: TcbHandle) -> Option<&Tcb> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.tcb.as_ref()
    }

    /// Mutably borrows the TCB addressed by `handle`, if it is still live.
    pub fn get_mut(&mut self, handle: TcbHandle) -> Option<&mut Tcb> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.tcb.as_mut()
    }

    /// Iterates over every currently-live TCB, for invariant checks that
    /// must hold across the whole arena rather than one handle at a time.
    pub fn iter(&self) -> impl Iterator<Item = &Tcb> {
        self.slots.iter().filter_map(|slot| slot.tcb.as_ref())
    }
}

/// Maps host-OS task identities to TCB handles and back (§4.1).
///
/// Lookups are meant to be safe from interrupt-like contexts with no global
/// lock; this workspace's `HashMap` stand-in for the host's "task-specific
/// data key" is not itself lock-free, but it is never touched from the
/// fast syscall path in the real design (see [`crate::host::Host::shadow_slot`]) —
/// here it models the registry's *semantics*, the lock-free fast path is the
/// `Host` contract's job to provide in a real integration.
#[derive(Default)]
pub struct TcbRegistry {
    by_task: HashMap<HostTaskId, TcbHandle>,
}

impl TcbRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `host_task` with `handle`.
    pub fn bind(&mut self, host_task: HostTaskId, handle: TcbHandle) -> Result<(), CoreError> {
        if self.by_task.contains_key(&host_task) {
            return Err(CoreError::BadHandle);
        }
        self.by_task.insert(host_task, handle);
        Ok(())
    }

    /// Looks up the TCB handle mated to `host_task`.
    pub fn lookup(&self, host_task: HostTaskId) -> Option<TcbHandle> {
        self.by_task.get(&host_task).copied()
    }

    /// Clears the association for `host_task`. Idempotent.
    pub fn unbind(&mut self, host_task: HostTaskId) {
        self.by_task.remove(&host_task);
    }
}
