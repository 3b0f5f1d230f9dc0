//! The `Host` contract: everything the migration engine needs from the
//! general-purpose OS kernel it co-resides with.
//!
//! A dual-kernel nucleus normally lives as a Linux kernel module and
//! cannot be unit-tested without booting a patched kernel. Built against
//! this trait instead, the identical harden/relax/RPI/mayday state
//! machine in [`crate::mode`], [`crate::gatekeeper`] and [`crate::rpi`]
//! runs both against a future real implementation (arch intrinsics, the
//! interrupt pipeline, the real task scheduler) and against
//! [`crate::sim_host::SimHost`] today, under `cargo test`.

use xeno_core::error::CoreError;

use crate::percpu::PerCpuId;
use crate::ppd::ProcessId;
use crate::signal::Signal;
use crate::tcb::HostTaskId;

/// The host task's scheduling state, as the migration engine needs to
/// observe and change it.
///
/// `InterruptibleAtomic` is `TASK_INTERRUPTIBLE` with the `ATOMICSWITCH`
/// hint set (§4.2 step 3): the gatekeeper must treat it the same as plain
/// `Interruptible` when deciding whether to resume the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTaskState {
    /// Runnable or running under the host scheduler.
    Running,
    /// Blocked, awaiting an explicit wakeup.
    Interruptible,
    /// Blocked with the atomic-switch hint set (mid-harden handoff).
    InterruptibleAtomic,
}

impl HostTaskState {
    /// `true` for either interruptible variant — what the gatekeeper
    /// checks before resuming a target (§4.2 step 4).
    pub fn is_interruptible(self) -> bool {
        matches!(self, Self::Interruptible | Self::InterruptibleAtomic)
    }
}

/// Everything the migration engine asks of the host-OS kernel interface.
///
/// Explicitly out of scope per §1: the interrupt pipeline, the real task
/// scheduler, and real memory mapping are never implemented here — this
/// trait only names the contracts the migration engine's algorithms rely
/// on, so a real integration can satisfy it with arch intrinsics while
/// [`crate::sim_host::SimHost`] satisfies it with OS threads and condvars.
pub trait Host: Send + Sync {
    /// Associates the calling OS thread with `task`/`cpu` for the
    /// lifetime of that thread, so later calls to [`Host::current_task`]
    /// and [`Host::current_cpu`] from the same thread resolve correctly.
    fn register_task(&self, task: HostTaskId, cpu: PerCpuId);

    /// The process (`mm`) `task`'s host-OS task belongs to, for the sys
    /// skin's `sys_bind` and the cleanup hook's PPD sweep (§4.7, §4.8).
    fn process_of(&self, task: HostTaskId) -> ProcessId;

    /// The host task identity of the calling thread, if registered.
    fn current_task(&self) -> Option<HostTaskId>;

    /// The CPU the calling thread is (simulated to be) running on.
    fn current_cpu(&self) -> Option<PerCpuId>;

    /// Raises `CAP_SYS_NICE`, `CAP_IPC_LOCK`, `CAP_SYS_RAWIO` for `process`
    /// (§6: obligation of a successful `sys_bind`).
    fn grant_rt_caps(&self, process: ProcessId);

    /// `true` if `process` has called `mlockall`; used to decide whether
    /// `SIGDEBUG(NoMlock)` should be raised.
    fn mlockall_active(&self, process: ProcessId) -> bool;

    /// `true` if `process` holds `CAP_SYS_NICE`.
    fn has_cap_sys_nice(&self, process: ProcessId) -> bool;

    /// `true` if `process` is a member of the `xenomai_gid` group (§6).
    fn in_rt_group(&self, process: ProcessId) -> bool;

    /// The process's executable path, for sys-PPD diagnostics only.
    fn exe_path(&self, process: ProcessId) -> Option<String>;

    /// The current scheduling state of `task`.
    fn task_state(&self, task: HostTaskId) -> HostTaskState;

    /// Sets `task`'s state to interruptible (§4.2 step 3 / §4.3.1 step 4).
    fn set_interruptible(&self, task: HostTaskId, atomic_switch: bool);

    /// Marks `task` runnable and wakes anyone blocked in
    /// [`Host::host_schedule`]/[`Host::suspend_infinite`] for it.
    fn wake_task(&self, task: HostTaskId);

    /// Calls the host scheduler: blocks the calling thread (which must be
    /// `task`'s own) until `task` is next made runnable.
    fn host_schedule(&self, task: HostTaskId);

    /// The cooperative suspend relax uses to hand control to the host
    /// scheduler with RELAXED set (§4.3.2 step 3): blocks until woken.
    fn suspend_infinite(&self, task: HostTaskId);

    /// Sets `task`'s host-side scheduling priority, performing the
    /// `SCHED_FIFO` clamp (§4.3.2): values are clamped to
    /// `[1, HOST_FIFO_MAX-1]`; `0` maps to `SCHED_OTHER`.
    fn set_host_priority(&self, task: HostTaskId, priority: u32);

    /// Realigns `task`'s host CPU affinity mask.
    fn set_affinity(&self, task: HostTaskId, mask: u64);

    /// `true` if this host implementation can redirect user-space control
    /// to a mayday page at all (§4.5's `XNARCH_HAVE_MAYDAY` fallback).
    fn supports_mayday(&self) -> bool;

    /// Allocates the one shared mayday page, returning an opaque address.
    fn alloc_mayday_page(&self) -> Result<u64, CoreError>;

    /// Arms the mayday trap on `task`: the next return-to-user crossing
    /// redirects there instead of resuming normally.
    fn arm_mayday(&self, task: HostTaskId);

    /// `true` if `task` currently has mayday armed.
    fn mayday_armed(&self, task: HostTaskId) -> bool;

    /// Clears the mayday trap on `task`.
    fn disarm_mayday(&self, task: HostTaskId);

    /// Queues `signal` for delivery to `task`. If `task` is currently
    /// interruptible, this also wakes it — mirroring how a real signal
    /// delivery interrupts a `TASK_INTERRUPTIBLE` wait.
    fn send_signal(&self, task: HostTaskId, signal: Signal);

    /// Consumes and returns the next pending signal for `task`, if any.
    fn take_pending_signal(&self, task: HostTaskId) -> Option<Signal>;

    /// `true` if `task` has at least one pending signal, without consuming it.
    fn has_pending_signal(&self, task: HostTaskId) -> bool;
}
