//! The mode-transition engine: harden, relax, kick (§4.3).
//!
//! `harden` and `relax` operate on an already-resolved [`TcbHandle`] rather
//! than reaching for `Host::current_task()` themselves, so the syscall
//! dispatch context ([`crate::syscall_ctx::SyscallCtx`]) stays the single
//! place that resolves "who is calling" — these functions are the engine,
//! not the caller-identity lookup.

use xeno_core::error::CoreError;

use crate::core::{gatekeeper_task, Core};
use crate::mayday;
use crate::rpi::Tracker;
use crate::signal::{DebugReason, Signal};
use crate::tcb::{InfoFlags, ThreadState, TcbHandle};

/// Moves `handle` from relaxed (host) to primary (real-time) mode.
///
/// See [`crate::gatekeeper`] for the other half of this handoff. Loops if
/// the thread migrates to a different CPU while waiting on `gksync`,
/// since the gatekeeper it just synchronized with is no longer the right
/// one to ask.
pub fn harden(core: &Core, handle: TcbHandle) -> Result<(), CoreError> {
    loop {
        let (host_task, home_cpu) = {
            let guard = core.lock();
            let tcb = guard.tcbs.get(handle).ok_or(CoreError::BadHandle)?;
            (tcb.host_task, tcb.cpu)
        };

        let channel = core.gk_channel(home_cpu);
        channel.gksync.acquire();

        let migrated = {
            let guard = core.lock();
            guard.tcbs.get(handle).map(|t| t.cpu) != Some(home_cpu)
        };
        if migrated {
            // Someone else's gatekeeper owns this thread now; let this one
            // go and retry against wherever it actually lives.
            channel.gksync.release();
            continue;
        }

        {
            let mut guard = core.lock();
            let tcb = guard.tcbs.get_mut(handle).ok_or(CoreError::BadHandle)?;
            tcb.info.insert(InfoFlags::ATOMIC);
        }
        core.host().set_interruptible(host_task, true);
        *channel.gktarget.lock().unwrap() = Some(handle);
        // Distinct from gksync: this is the gatekeeper's own per-task wake,
        // not the binary semaphore.
        core.host().wake_task(gatekeeper_task(home_cpu));
        core.host().host_schedule(host_task);

        let (still_relaxed, kicked) = {
            let mut guard = core.lock();
            let tcb = guard.tcbs.get_mut(handle).ok_or(CoreError::BadHandle)?;
            tcb.info.remove(InfoFlags::ATOMIC);
            let relaxed = tcb.state.contains(ThreadState::RELAXED);
            let kicked = !relaxed && tcb.info.contains(InfoFlags::KICKED);
            if kicked {
                tcb.info.remove(InfoFlags::KICKED | InfoFlags::BREAK);
            }
            (relaxed, kicked)
        };

        if still_relaxed {
            // The gatekeeper silently dropped our request: a signal beat it
            // to waking this task. Synchronize on gksync once more so the
            // gatekeeper has definitely retired the stale gktarget entry
            // before we hand the token back, then tell the caller to retry.
            channel.gksync.acquire();
            channel.gksync.release();
            return Err(CoreError::SignalRestart);
        }

        {
            let mut guard = core.lock();
            if let Some(tcb) = guard.tcbs.get_mut(handle) {
                tcb.stats.mode_switches += 1;
            }
        }

        if kicked {
            // Moved while a kick was already in flight for it: honor the
            // kick immediately rather than entering primary mode at all.
            relax(core, handle, None)?;
            return Err(CoreError::SignalRestart);
        }

        return Ok(());
    }
}

/// Moves `handle` from primary to relaxed (host) mode.
///
/// `reason`, if given, is delivered as a `SIGDEBUG` after the switch — used
/// for the mandatory notification cases (`Watchdog`, `NoMlock`,
/// `MigratePrioInv`) rather than being conditioned on a per-thread debug
/// toggle, since this workspace has no `prctl`-style per-process opt-in
/// registry (§6, out of scope) to check here.
pub fn relax(core: &Core, handle: TcbHandle, reason: Option<DebugReason>) -> Result<(), CoreError> {
    let (host_task, cpu, priority, trap_armed, pending_priority, pending_affinity) = {
        let mut guard = core.lock();
        let tcb = guard.tcbs.get_mut(handle).ok_or(CoreError::BadHandle)?;
        tcb.state.insert(ThreadState::RELAXED);
        tcb.stats.mode_switches += 1;
        let trap_armed = tcb.state.contains(ThreadState::TRAP_ON_SWITCH);
        tcb.state.remove(ThreadState::TRAP_ON_SWITCH);
        let pending_priority = tcb.info.contains(InfoFlags::PRIORITY_SET).then_some(tcb.priority);
        let pending_affinity = tcb.info.contains(InfoFlags::AFFINITY_SET).then_some(tcb.affinity);
        tcb.info.remove(InfoFlags::PRIORITY_SET | InfoFlags::AFFINITY_SET);
        (
            tcb.host_task,
            tcb.cpu,
            tcb.priority,
            trap_armed,
            pending_priority,
            pending_affinity,
        )
    };

    Tracker::new(core).push(cpu, handle);
    core.lostage_ring(cpu)
        .push(crate::lostage::LoStageRequest::WakeTask(host_task));

    if let Some(reason) = reason {
        core.host().send_signal(host_task, Signal::Debug(reason));
    } else if trap_armed {
        core.host()
            .send_signal(host_task, Signal::Debug(DebugReason::MigrateSyscall));
    }

    // Step 7: a priority change requested while still primary is delivered
    // as a renice signal now that the thread is host-schedulable again.
    if pending_priority.is_some() {
        core.host().send_signal(host_task, Signal::Shadow);
    }

    // Step 8: likewise for a pending affinity change (§4.3.2).
    if let Some(mask) = pending_affinity {
        core.host().set_affinity(host_task, mask);
    }

    // Reenter root priority: the host side is responsible for the
    // SCHED_FIFO clamp (`Host::set_host_priority`'s documented contract).
    core.host().set_host_priority(host_task, priority);
    Ok(())
}

/// Forces `handle` out of primary mode as soon as possible (§4.3.3).
///
/// A no-op if already relaxed. If the target is some other thread, arms
/// the mayday trap so its next return-to-user crossing relaxes it there;
/// either way a `Signal::Shadow` is sent to break it out of whatever wait
/// it may currently be blocked in.
pub fn kick(core: &Core, handle: TcbHandle) -> Result<(), CoreError> {
    let (host_task, already_relaxed) = {
        let guard = core.lock();
        let tcb = guard.tcbs.get(handle).ok_or(CoreError::BadHandle)?;
        (tcb.host_task, tcb.state.contains(ThreadState::RELAXED))
    };
    if already_relaxed {
        return Ok(());
    }

    let is_self = core.host().current_task() == Some(host_task);

    {
        let mut guard = core.lock();
        if let Some(tcb) = guard.tcbs.get_mut(handle) {
            tcb.info.insert(InfoFlags::KICKED | InfoFlags::BREAK);
        }
    }

    core.host().send_signal(host_task, Signal::Shadow);

    if !is_self {
        mayday::arm(core.host().as_ref(), host_task);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::percpu::PerCpuId;
    use crate::sim_host::SimHost;
    use crate::skin::MagicId;
    use crate::tcb::{HostTaskId, SchedClass, Tcb, TcbStats};
    use std::sync::Arc;

    fn insert_relaxed_tcb(core: &Core, host_task: HostTaskId, cpu: PerCpuId) -> TcbHandle {
        core.host().register_task(host_task, cpu);
        let mut guard = core.lock();
        guard.tcbs.insert(Tcb {
            magic: MagicId(1),
            process: crate::ppd::ProcessId(1),
            host_task,
            state: ThreadState::RELAXED | ThreadState::MAPPED,
            info: InfoFlags::empty(),
            priority: 30,
            base_priority: 30,
            sched_class: SchedClass::Fifo,
            affinity: u64::MAX,
            cpu,
            rpi_linked: false,
            stats: TcbStats::default(),
        })
    }

    #[test]
    fn relax_sets_relaxed_and_links_rpi_queue() {
        let core = Core::new(Arc::new(SimHost::new(true)), 1);
        let host_task = HostTaskId(1);
        core.host().register_task(host_task, PerCpuId(0));
        let handle = {
            let mut guard = core.lock();
            guard.tcbs.insert(Tcb {
                magic: MagicId(1),
                process: crate::ppd::ProcessId(1),
                host_task,
                state: ThreadState::empty(),
                info: InfoFlags::empty(),
                priority: 50,
                base_priority: 50,
                sched_class: SchedClass::Fifo,
                affinity: u64::MAX,
                cpu: PerCpuId(0),
                rpi_linked: false,
                stats: TcbStats::default(),
            })
        };

        relax(&core, handle, None).unwrap();

        let guard = core.lock();
        let tcb = guard.tcbs.get(handle).unwrap();
        assert!(tcb.state.contains(ThreadState::RELAXED));
        assert!(tcb.rpi_linked);
        assert_eq!(guard.percpu[0].rpi_queue.max_priority(), Some(50));
    }

    #[test]
    fn relax_with_reason_delivers_sigdebug() {
        let core = Core::new(Arc::new(SimHost::new(true)), 1);
        let host_task = HostTaskId(2);
        core.host().register_task(host_task, PerCpuId(0));
        let handle = {
            let mut guard = core.lock();
            guard.tcbs.insert(Tcb {
                magic: MagicId(1),
                process: crate::ppd::ProcessId(1),
                host_task,
                state: ThreadState::empty(),
                info: InfoFlags::empty(),
                priority: 10,
                base_priority: 10,
                sched_class: SchedClass::Other,
                affinity: u64::MAX,
                cpu: PerCpuId(0),
                rpi_linked: false,
                stats: TcbStats::default(),
            })
        };

        relax(&core, handle, Some(DebugReason::NoMlock)).unwrap();
        assert!(core.host().has_pending_signal(host_task));
        assert_eq!(
            core.host().take_pending_signal(host_task),
            Some(Signal::Debug(DebugReason::NoMlock))
        );
    }

    #[test]
    fn relax_delivers_pending_priority_and_affinity_changes() {
        let sim_host = Arc::new(SimHost::new(true));
        let core = Core::new(sim_host.clone(), 1);
        let host_task = HostTaskId(9);
        core.host().register_task(host_task, PerCpuId(0));
        let handle = {
            let mut guard = core.lock();
            guard.tcbs.insert(Tcb {
                magic: MagicId(1),
                process: crate::ppd::ProcessId(1),
                host_task,
                state: ThreadState::empty(),
                info: InfoFlags::PRIORITY_SET | InfoFlags::AFFINITY_SET,
                priority: 42,
                base_priority: 10,
                sched_class: SchedClass::Fifo,
                affinity: 0b0011,
                cpu: PerCpuId(0),
                rpi_linked: false,
                stats: TcbStats::default(),
            })
        };

        relax(&core, handle, None).unwrap();

        assert!(core.host().has_pending_signal(host_task));
        assert_eq!(
            core.host().take_pending_signal(host_task),
            Some(Signal::Shadow)
        );
        assert_eq!(sim_host.affinity_of(host_task), Some(0b0011));
        let guard = core.lock();
        let tcb = guard.tcbs.get(handle).unwrap();
        assert!(!tcb.info.contains(InfoFlags::PRIORITY_SET));
        assert!(!tcb.info.contains(InfoFlags::AFFINITY_SET));
    }

    #[test]
    fn kick_on_already_relaxed_thread_is_a_noop() {
        let core = Core::new(Arc::new(SimHost::new(true)), 1);
        let host_task = HostTaskId(3);
        let handle = insert_relaxed_tcb(&core, host_task, PerCpuId(0));
        kick(&core, handle).unwrap();
        assert!(!core.host().has_pending_signal(host_task));
    }

    #[test]
    fn kick_on_primary_thread_arms_mayday_and_signals() {
        let core = Core::new(Arc::new(SimHost::new(true)), 1);
        let host_task = HostTaskId(4);
        core.host().register_task(host_task, PerCpuId(0));
        let handle = {
            let mut guard = core.lock();
            guard.tcbs.insert(Tcb {
                magic: MagicId(1),
                process: crate::ppd::ProcessId(1),
                host_task,
                state: ThreadState::empty(),
                info: InfoFlags::empty(),
                priority: 10,
                base_priority: 10,
                sched_class: SchedClass::Fifo,
                affinity: u64::MAX,
                cpu: PerCpuId(0),
                rpi_linked: false,
                stats: TcbStats::default(),
            })
        };

        kick(&core, handle).unwrap();
        assert!(core.host().has_pending_signal(host_task));
        assert!(core.host().mayday_armed(host_task));
        let guard = core.lock();
        assert!(guard.tcbs.get(handle).unwrap().info.contains(InfoFlags::KICKED));
    }

    #[test]
    fn harden_round_trips_through_the_gatekeeper() {
        let core = Core::new(Arc::new(SimHost::new(true)), 1);
        core.start();

        let host_task = HostTaskId(100);
        let handle = insert_relaxed_tcb(&core, host_task, PerCpuId(0));

        let result = harden(&core, handle);
        assert_eq!(result, Ok(()));

        let guard = core.lock();
        let tcb = guard.tcbs.get(handle).unwrap();
        assert!(!tcb.state.contains(ThreadState::RELAXED));
        assert_eq!(tcb.stats.mode_switches, 1);
        drop(guard);

        core.shutdown();
    }

    #[test]
    fn harden_on_two_cpus_each_round_trips_independently() {
        let core = Core::new(Arc::new(SimHost::new(true)), 2);
        core.start();

        let t0 = HostTaskId(200);
        let h0 = insert_relaxed_tcb(&core, t0, PerCpuId(0));
        let t1 = HostTaskId(201);
        let h1 = insert_relaxed_tcb(&core, t1, PerCpuId(1));

        assert_eq!(harden(&core, h0), Ok(()));
        assert_eq!(harden(&core, h1), Ok(()));

        let guard = core.lock();
        assert!(!guard.tcbs.get(h0).unwrap().state.contains(ThreadState::RELAXED));
        assert!(!guard.tcbs.get(h1).unwrap().state.contains(ThreadState::RELAXED));
        drop(guard);

        core.shutdown();
    }
}
