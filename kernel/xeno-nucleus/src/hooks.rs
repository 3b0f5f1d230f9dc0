//! Event hooks (§4.8): the callbacks a real integration would wire into
//! the host kernel's own task-exit, schedule-tail, signal-wake, setsched
//! and `mm`-drop notification points.
//!
//! None of these run on their own in this workspace — there is no patched
//! host kernel to call them (§1 non-goal) — but each is a plain function
//! over [`Core`] that a future integration (or an integration test driving
//! [`crate::sim_host::SimHost`]) calls at the point the matching host
//! lifecycle event would have fired.

use std::sync::Arc;

use crate::core::Core;
use crate::mode;
use crate::percpu::PerCpuId;
use crate::ppd::ProcessId;
use crate::rpi::Tracker;
use crate::tcb::{SchedClass, TcbHandle};

/// Task-exit hook: unbinds `handle`'s host task from the registry, removes
/// it from its CPU's RPI queue if linked, and frees the TCB from the arena.
///
/// Clears the host task's TCB back-pointer and frees the TCB itself once
/// the host task is truly gone. Idempotent: calling this twice for a
/// handle already removed is a no-op, since
/// [`crate::tcb::TcbArena::remove`] itself tolerates a stale handle.
pub fn task_exit(core: &Core, handle: TcbHandle) {
    let host_task = {
        let guard = core.lock();
        guard.tcbs.get(handle).map(|t| t.host_task)
    };
    Tracker::new(core).pop(handle);
    let mut guard = core.lock();
    if let Some(host_task) = host_task {
        guard.registry.unbind(host_task);
    }
    guard.tcbs.remove(handle);
}

/// Schedule-tail hook: invoked from the host scheduler on every context
/// switch, not only ones involving a shadow (§4.4 `rpi_switch`).
///
/// Timer-wheel rearming and ptrace single-step bookkeeping that the
/// original's schedule-tail hook also performs are out of scope (§1: no
/// timer subsystem, no debugger integration modeled here) — this hook's
/// only normative behavior is the RPI re-evaluation `rpi_switch` performs.
pub fn schedule_tail(core: &Core, cpu: PerCpuId, prev: Option<TcbHandle>, next: Option<TcbHandle>) {
    Tracker::new(core).switch(cpu, prev, next);
}

/// Sigwake hook: a signal was just queued for `handle`'s host task while
/// it runs in primary mode. Kicks it so the next return-to-user crossing
/// relaxes it (§4.3.3): wake up the shadow, relaxing it.
pub fn sigwake(core: &Core, handle: TcbHandle) -> Result<(), xeno_core::error::CoreError> {
    mode::kick(core, handle)
}

/// Setsched hook: the host scheduler changed `handle`'s priority behind
/// the nucleus's back (e.g. via `sched_setscheduler`). Propagates the new
/// priority into the TCB and re-sorts its RPI queue entry if linked.
///
/// Only `SCHED_FIFO`-class threads are tracked (§4.4): a `SCHED_OTHER`
/// thread never roots the RPI boost, so there is nothing to propagate for
/// it, and the hook is a no-op for any other scheduling class. The
/// scaling from host priority to nucleus priority is 1:1, per the §4.3.2
/// `SCHED_FIFO` clamp contract.
pub fn setsched(core: &Core, handle: TcbHandle, host_priority: u32) {
    let is_fifo = {
        let mut guard = core.lock();
        let Some(tcb) = guard.tcbs.get_mut(handle) else {
            return;
        };
        if !matches!(tcb.sched_class, SchedClass::Fifo) {
            return;
        }
        tcb.priority = host_priority;
        tcb.base_priority = host_priority;
        true
    };
    if is_fifo {
        Tracker::new(core).update(handle);
    }
}

/// Cleanup hook: `process`'s `mm` is being torn down. Sweeps every PPD it
/// owns in descending-muxid order, running each skin's `detach` callback
/// before finally removing the sys-PPD (§4.7's "root outlives siblings"
/// invariant means the sys-PPD is naturally swept last).
///
/// Idempotent: a second call for a process already cleaned up finds no
/// PPDs to sweep and does nothing (§8 idempotence property).
pub fn cleanup(core: &Arc<Core>, process: ProcessId) {
    let muxids = {
        let guard = core.lock();
        guard.ppds.process_muxids_descending(process)
    };
    for muxid in muxids {
        let (callbacks, state) = {
            let mut guard = core.lock();
            let callbacks = guard.skins.get(muxid).map(|s| s.callbacks.clone());
            let state = guard.ppds.get_mut(process, muxid).and_then(|ppd| ppd.state.take());
            (callbacks, state)
        };
        if let Some(callbacks) = callbacks {
            callbacks.detach(process, state);
        }
    }
    let mut guard = core.lock();
    guard.ppds.sweep_process(process);
}
