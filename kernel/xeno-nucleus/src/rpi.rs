//! RPI (root-priority inheritance) queue: the per-CPU data structure that
//! backs the tracker operations in [`crate::core::Core`].
//!
//! Keeps a priority-ordered set of relaxed real-time TCBs. Small linear
//! scans are fine here: in practice a CPU has at most a handful of relaxed
//! real-time threads runnable at once, so an ordered `Vec` has the same
//! asymptotics as an ordered doubly-linked list without the pointer
//! bookkeeping.

use crate::core::Core;
use crate::percpu::PerCpuId;
use crate::tcb::{HostTaskId, SchedClass, TcbHandle, ThreadState};

/// A CPU's RPI queue: relaxed TCBs ordered by descending priority.
#[derive(Default)]
pub struct RpiQueue {
    // Kept sorted descending by priority; ties keep FIFO insertion order.
    entries: Vec<(u32, TcbHandle)>,
}

impl RpiQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if no thread is currently linked on this queue.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts `handle` at `priority`, keeping the queue sorted. A no-op if
    /// `handle` is already linked.
    pub fn push(&mut self, priority: u32, handle: TcbHandle) {
        if self.entries.iter().any(|(_, h)| *h == handle) {
            return;
        }
        let pos = self
            .entries
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (priority, handle));
    }

    /// Removes `handle` if linked. Returns `true` if it was found.
    pub fn remove(&mut self, handle: TcbHandle) -> bool {
        if let Some(pos) = self.entries.iter().position(|(_, h)| *h == handle) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Re-sorts `handle` to `new_priority` (pop then push).
    pub fn update(&mut self, handle: TcbHandle, new_priority: u32) {
        self.remove(handle);
        self.push(new_priority, handle);
    }

    /// The highest priority currently queued, if any.
    pub fn max_priority(&self) -> Option<u32> {
        self.entries.first().map(|(p, _)| *p)
    }

    /// `true` if `handle` is currently linked on this queue.
    pub fn contains(&self, handle: TcbHandle) -> bool {
        self.entries.iter().any(|(_, h)| *h == handle)
    }
}

/// RPI tracker operations (§4.4), acting on a [`Core`]'s per-CPU RPI
/// queues. A thin operation set over [`RpiQueue`]/[`Core`] rather than a
/// struct of its own state — every method takes the `Core` it operates on
/// explicitly.
pub struct Tracker<'a> {
    core: &'a Core,
}

impl<'a> Tracker<'a> {
    /// Creates a tracker bound to `core`.
    pub fn new(core: &'a Core) -> Self {
        Self { core }
    }

    /// `true` if `handle`'s TCB is eligible for RPI tracking: `SCHED_FIFO`
    /// class and without the RPI-off status bit (§4.4 `rpi_push`).
    fn eligible(tcb: &crate::tcb::Tcb) -> bool {
        matches!(tcb.sched_class, SchedClass::Fifo) && !tcb.state.contains(ThreadState::RPI_OFF)
    }

    /// Inserts `handle` into `cpu`'s RPI queue if eligible; otherwise a
    /// no-op (the root surrogate simply never boosts for it). Caller must
    /// already hold the `Core` lock.
    pub fn push_locked(
        guard: &mut crate::core::CoreLocked,
        cpu: PerCpuId,
        handle: TcbHandle,
    ) {
        let Some(tcb) = guard.tcbs.get_mut(handle) else {
            return;
        };
        if !Self::eligible(tcb) {
            return;
        }
        let priority = tcb.priority;
        tcb.rpi_linked = true;
        tcb.cpu = cpu;
        guard.percpu[cpu.0 as usize].rpi_queue.push(priority, handle);
    }

    /// Removes `handle` from its CPU's RPI queue, if linked. Caller must
    /// already hold the `Core` lock.
    pub fn pop_locked(guard: &mut crate::core::CoreLocked, handle: TcbHandle) {
        let Some(tcb) = guard.tcbs.get_mut(handle) else {
            return;
        };
        if !tcb.rpi_linked {
            return;
        }
        tcb.rpi_linked = false;
        let cpu = tcb.cpu;
        guard.percpu[cpu.0 as usize].rpi_queue.remove(handle);
    }

    /// Re-sorts `handle` after a priority change. Caller must already hold
    /// the `Core` lock.
    pub fn update_locked(guard: &mut crate::core::CoreLocked, handle: TcbHandle) {
        let Some(tcb) = guard.tcbs.get(handle) else {
            return;
        };
        if !tcb.rpi_linked {
            return;
        }
        let (cpu, priority) = (tcb.cpu, tcb.priority);
        guard.percpu[cpu.0 as usize].rpi_queue.update(handle, priority);
    }

    /// Pushes `handle` and re-applies `cpu`'s root priority.
    pub fn push(&self, cpu: PerCpuId, handle: TcbHandle) {
        {
            let mut guard = self.core.lock();
            Self::push_locked(&mut guard, cpu, handle);
        }
        self.core.rpi_apply_root_priority(cpu);
    }

    /// Pops `handle` and re-applies its CPU's root priority.
    pub fn pop(&self, handle: TcbHandle) {
        let cpu = {
            let mut guard = self.core.lock();
            let cpu = guard.tcbs.get(handle).map(|t| t.cpu);
            Self::pop_locked(&mut guard, handle);
            cpu
        };
        if let Some(cpu) = cpu {
            self.core.rpi_apply_root_priority(cpu);
        }
    }

    /// Re-sorts `handle` and re-applies its CPU's root priority.
    pub fn update(&self, handle: TcbHandle) {
        let cpu = {
            let mut guard = self.core.lock();
            let cpu = guard.tcbs.get(handle).map(|t| t.cpu);
            Self::update_locked(&mut guard, handle);
            cpu
        };
        if let Some(cpu) = cpu {
            self.core.rpi_apply_root_priority(cpu);
        }
    }

    /// Invoked from the schedule-tail hook on every host reschedule
    /// (§4.4, grounded in `rpi_switch`): pops `prev` if it was relaxed and
    /// blocking (skipping mid-harden threads, i.e. with `ATOMIC` set, to
    /// avoid popping a thread about to no longer be relaxed), then pushes
    /// `next` if it is a relaxed eligible shadow, migrating it first if it
    /// was linked on a different CPU's queue.
    pub fn switch(&self, cpu: PerCpuId, prev: Option<TcbHandle>, next: Option<TcbHandle>) {
        let mut guard = self.core.lock();
        if let Some(prev) = prev {
            if let Some(tcb) = guard.tcbs.get(prev) {
                let blocked_relaxed = tcb.state.contains(ThreadState::RELAXED)
                    && !tcb.info.contains(crate::tcb::InfoFlags::ATOMIC);
                if blocked_relaxed {
                    Self::pop_locked(&mut guard, prev);
                }
            }
        }
        if let Some(next) = next {
            if let Some(tcb) = guard.tcbs.get(next) {
                if tcb.state.contains(ThreadState::RELAXED) {
                    Self::push_locked(&mut guard, cpu, next);
                }
            }
        }
        drop(guard);
        self.core.rpi_apply_root_priority(cpu);
    }

    /// Unlinks `handle` from whatever CPU's queue it is linked on, when it
    /// resumes on a different CPU than that queue (§4.4 `rpi_clear_remote`).
    /// IPIs the source CPU so it can lower its root priority if the queue
    /// emptied. Must never be called while the caller holds the `Core`
    /// lock — see §9 Open Question 1.
    pub fn clear_remote(&self, handle: TcbHandle) {
        xeno_core::sync::assert_core_lock_not_held();
        let source_cpu = {
            let mut guard = self.core.lock();
            let cpu = guard.tcbs.get(handle).filter(|t| t.rpi_linked).map(|t| t.cpu);
            if cpu.is_some() {
                Self::pop_locked(&mut guard, handle);
            }
            cpu
        };
        if let Some(cpu) = source_cpu {
            self.core.rpi_ipi_reevaluate(cpu);
        }
    }

    /// The host-task identity whose priority mirrors `cpu`'s root surrogate.
    pub fn root_host_task(cpu: PerCpuId) -> HostTaskId {
        crate::core::gatekeeper_task(cpu)
    }
}
