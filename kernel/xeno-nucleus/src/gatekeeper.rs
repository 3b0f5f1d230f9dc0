//! Per-CPU gatekeeper (§4.2).
//!
//! The gatekeeper is the only thing that ever releases `gksync` in the
//! success path. It publishes the token ("make the request token
//! available") immediately before blocking, so [`crate::mode::harden`]'s
//! acquire of the same semaphore is what establishes "ownership of
//! gktarget" for the duration of one handoff — the gatekeeper does not
//! get the token back until it loops around to publish it again, which
//! only happens after it has fully processed (or dropped) the previous
//! request. This is what keeps "at most one gatekeeper request per CPU in
//! flight" true without a second lock.

use crate::core::{gatekeeper_task, Core};
use crate::host::HostTaskState;
use crate::percpu::PerCpuId;
use crate::rpi::Tracker;
use crate::tcb::{ThreadState, TcbHandle};

/// Base host-task identity gatekeepers are assigned from, chosen well
/// outside the range any real shadow's `HostTaskId` would use in tests.
pub const GATEKEEPER_TASK_BASE: u64 = 1 << 32;

/// One CPU's gatekeeper worker.
pub struct Gatekeeper {
    cpu: PerCpuId,
}

impl Gatekeeper {
    /// Creates the gatekeeper for `cpu`. Does not start running until
    /// [`Gatekeeper::run`] is called on a dedicated thread.
    pub fn new(cpu: PerCpuId) -> Self {
        Self { cpu }
    }

    /// Runs the gatekeeper loop until `core` asks it to stop (§9.2's
    /// `kthread_should_stop` has no real analogue here; `Core::shutdown`
    /// flips a flag and wakes this task instead).
    pub fn run(&self, core: &Core) {
        let task = gatekeeper_task(self.cpu);
        core.host().register_task(task, self.cpu);
        // "at the highest host priority" (§4.2 step 1).
        core.host().set_host_priority(task, xeno_core::config::HOST_FIFO_MAX);

        loop {
            core.host().set_interruptible(task, false);
            // "On start it raises gksync once to publish availability" /
            // "Make the request token available" at the top of every
            // subsequent iteration.
            core.gk_channel(self.cpu).gksync.release();
            core.host().host_schedule(task);

            if core.gatekeeper_should_stop() {
                return;
            }

            self.service_one(core);
        }
    }

    /// One iteration of the gatekeeper's request-processing body, split
    /// out so tests can drive it without a background thread.
    fn service_one(&self, core: &Core) {
        let target = core.gk_channel(self.cpu).gktarget.lock().unwrap().take();
        let Some(handle) = target else {
            return;
        };
        let host_task = {
            let guard = core.lock();
            guard.tcbs.get(handle).map(|t| t.host_task)
        };
        let Some(host_task) = host_task else {
            return;
        };
        if !core.host().task_state(host_task).is_interruptible() {
            // A signal raced us; the requestor will observe this itself
            // and restart. Drop the request silently (§4.2 step 4).
            return;
        }

        Tracker::new(core).pop(handle);

        let needs_migration = {
            let guard = core.lock();
            guard.tcbs.get(handle).map(|t| t.cpu) != Some(self.cpu)
        };
        if needs_migration {
            self.passive_migrate(core, handle);
        }

        {
            let mut guard = core.lock();
            if let Some(tcb) = guard.tcbs.get_mut(handle) {
                tcb.state.remove(ThreadState::RELAXED);
            }
        }
        core.host().wake_task(host_task);
    }

    /// Passively migrates `handle` to this gatekeeper's CPU (§4.2 step 5):
    /// updates the TCB's recorded CPU without touching host-side affinity
    /// or timers, matching `xnsched_migrate_passive`'s documented scope.
    fn passive_migrate(&self, core: &Core, handle: TcbHandle) {
        let mut guard = core.lock();
        if let Some(tcb) = guard.tcbs.get_mut(handle) {
            tcb.cpu = self.cpu;
        }
    }
}

/// `true` if `state` means the gatekeeper should still honor a pending
/// resume request for it (helper kept alongside the type it classifies).
pub fn is_still_eligible(state: HostTaskState) -> bool {
    state.is_interruptible()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Core;
    use crate::mode;
    use crate::sim_host::SimHost;
    use crate::skin::MagicId;
    use crate::tcb::{HostTaskId, InfoFlags, SchedClass, Tcb, TcbStats};
    use std::sync::Arc;
    use xeno_core::error::CoreError;

    fn make_core() -> Arc<Core> {
        Core::new(Arc::new(SimHost::new(true)), 1)
    }

    fn insert_tcb(core: &Core, host_task: HostTaskId) -> TcbHandle {
        let mut guard = core.lock();
        guard.tcbs.insert(Tcb {
            magic: MagicId(1),
            process: crate::ppd::ProcessId(1),
            host_task,
            state: ThreadState::RELAXED | ThreadState::MAPPED,
            info: crate::tcb::InfoFlags::empty(),
            priority: 10,
            base_priority: 10,
            sched_class: SchedClass::Fifo,
            affinity: u64::MAX,
            cpu: PerCpuId(0),
            rpi_linked: false,
            stats: TcbStats::default(),
        })
    }

    #[test]
    fn service_one_drops_request_with_no_target() {
        let core = make_core();
        let gk = Gatekeeper::new(PerCpuId(0));
        // No gktarget published; must not panic.
        gk.service_one(&core);
    }

    #[test]
    fn service_one_resumes_an_interruptible_target() {
        let core = make_core();
        let host_task = HostTaskId(42);
        let handle = insert_tcb(&core, host_task);
        core.host().register_task(host_task, PerCpuId(0));
        core.host().set_interruptible(host_task, true);

        *core.gk_channel(PerCpuId(0)).gktarget.lock().unwrap() = Some(handle);
        let gk = Gatekeeper::new(PerCpuId(0));
        gk.service_one(&core);

        assert_eq!(
            core.host().task_state(host_task),
            crate::host::HostTaskState::Running
        );
        let guard = core.lock();
        assert!(!guard.tcbs.get(handle).unwrap().state.contains(ThreadState::RELAXED));
    }

    #[test]
    fn service_one_silently_drops_a_signal_raced_target() {
        let core = make_core();
        let host_task = HostTaskId(7);
        let handle = insert_tcb(&core, host_task);
        core.host().register_task(host_task, PerCpuId(0));
        // Simulate: a signal already woke this task back to Running.
        core.host().set_interruptible(host_task, true);
        core.host().send_signal(host_task, crate::signal::Signal::Shadow);
        assert_eq!(
            core.host().task_state(host_task),
            crate::host::HostTaskState::Running
        );

        *core.gk_channel(PerCpuId(0)).gktarget.lock().unwrap() = Some(handle);
        let gk = Gatekeeper::new(PerCpuId(0));
        gk.service_one(&core);

        // Still relaxed: the gatekeeper must not have touched it.
        let guard = core.lock();
        assert!(guard.tcbs.get(handle).unwrap().state.contains(ThreadState::RELAXED));
    }

    /// Drives `mode::harden` against this module's private `service_one`
    /// directly (no background gatekeeper thread), so a signal can be made
    /// to race the handoff deterministically: the target is woken by a
    /// signal before the gatekeeper ever gets to look at `gktarget`, so
    /// `service_one` drops the stale request silently and `harden` must
    /// report `SignalRestart` without having left the thread primary.
    #[test]
    fn harden_restarts_when_a_signal_races_the_gatekeeper() {
        let core = make_core();
        let host_task = HostTaskId(55);
        let handle = insert_tcb(&core, host_task);
        core.host().register_task(host_task, PerCpuId(0));

        // Publish one round of gatekeeper availability, as the real
        // gatekeeper loop does at the top of every iteration.
        core.gk_channel(PerCpuId(0)).gksync.release();

        let core2 = core.clone();
        let harden_thread = std::thread::spawn(move || mode::harden(&core2, handle));

        // Give harden() time to publish gktarget and block in
        // host_schedule before the signal beats the gatekeeper to it.
        std::thread::sleep(std::time::Duration::from_millis(20));
        core.host().send_signal(host_task, crate::signal::Signal::Shadow);

        let gk = Gatekeeper::new(PerCpuId(0));
        gk.service_one(&core);
        // Hand the token back, as the gatekeeper loop does once it has
        // fully processed (here, dropped) the request.
        core.gk_channel(PerCpuId(0)).gksync.release();

        let result = harden_thread.join().unwrap();
        assert_eq!(result, Err(CoreError::SignalRestart));

        let guard = core.lock();
        let tcb = guard.tcbs.get(handle).unwrap();
        assert!(tcb.state.contains(ThreadState::RELAXED));
        assert!(!tcb.info.contains(InfoFlags::ATOMIC));
    }
}
