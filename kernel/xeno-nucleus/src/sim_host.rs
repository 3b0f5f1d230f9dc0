//! A faithful, host-testable [`Host`] implementation backed by OS
//! threads and condvars, good enough to exercise every invariant in
//! end-to-end scenarios without hardware or a hypervisor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use xeno_core::error::CoreError;

use crate::host::{Host, HostTaskState};
use crate::percpu::PerCpuId;
use crate::ppd::ProcessId;
use crate::signal::Signal;
use crate::tcb::HostTaskId;

thread_local! {
    static THIS_THREAD: std::cell::Cell<Option<(HostTaskId, PerCpuId)>> = const { std::cell::Cell::new(None) };
}

struct TaskRecord {
    state: HostTaskState,
    priority: u32,
    affinity: u64,
    mayday_armed: bool,
    pending_signals: Vec<Signal>,
}

impl TaskRecord {
    fn new() -> Self {
        Self {
            state: HostTaskState::Running,
            priority: 0,
            affinity: u64::MAX,
            mayday_armed: false,
            pending_signals: Vec::new(),
        }
    }
}

struct Inner {
    tasks: HashMap<HostTaskId, TaskRecord>,
    processes_mlockall: std::collections::HashSet<ProcessId>,
    processes_cap_sys_nice: std::collections::HashSet<ProcessId>,
    processes_rt_group: std::collections::HashSet<ProcessId>,
    exe_paths: HashMap<ProcessId, String>,
    task_process: HashMap<HostTaskId, ProcessId>,
}

/// A simulated host kernel: real OS-thread scheduling state, modeled with
/// condvars instead of an arch-specific scheduler.
pub struct SimHost {
    inner: Mutex<Inner>,
    cv: Condvar,
    mayday_addr: AtomicU64,
    supports_mayday: bool,
}

impl SimHost {
    /// Creates a fresh simulated host. `supports_mayday` models the
    /// `XNARCH_HAVE_MAYDAY` compile-time capability as a runtime switch.
    pub fn new(supports_mayday: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                processes_mlockall: Default::default(),
                processes_cap_sys_nice: Default::default(),
                processes_rt_group: Default::default(),
                exe_paths: HashMap::new(),
                task_process: HashMap::new(),
            }),
            cv: Condvar::new(),
            mayday_addr: AtomicU64::new(0),
            supports_mayday,
        }
    }

    /// Test hook: marks `process` as having called `mlockall`.
    pub fn set_mlockall(&self, process: ProcessId, active: bool) {
        let mut inner = self.inner.lock().unwrap();
        if active {
            inner.processes_mlockall.insert(process);
        } else {
            inner.processes_mlockall.remove(&process);
        }
    }

    /// Test hook: grants/revokes `CAP_SYS_NICE` for `process`.
    pub fn set_cap_sys_nice(&self, process: ProcessId, has_it: bool) {
        let mut inner = self.inner.lock().unwrap();
        if has_it {
            inner.processes_cap_sys_nice.insert(process);
        } else {
            inner.processes_cap_sys_nice.remove(&process);
        }
    }

    /// Test hook: adds/removes `process` from the configured `xenomai_gid`.
    pub fn set_rt_group(&self, process: ProcessId, member: bool) {
        let mut inner = self.inner.lock().unwrap();
        if member {
            inner.processes_rt_group.insert(process);
        } else {
            inner.processes_rt_group.remove(&process);
        }
    }

    /// Test hook: reads back `task`'s current simulated affinity mask.
    pub fn affinity_of(&self, task: HostTaskId) -> Option<u64> {
        self.inner.lock().unwrap().tasks.get(&task).map(|t| t.affinity)
    }

    /// Test hook: reads back `task`'s current simulated host-side priority.
    pub fn priority_of(&self, task: HostTaskId) -> Option<u32> {
        self.inner.lock().unwrap().tasks.get(&task).map(|t| t.priority)
    }

    /// Test hook: sets the diagnostic executable path for `process`.
    pub fn set_exe_path(&self, process: ProcessId, path: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .exe_paths
            .insert(process, path.into());
    }

    /// Test hook: groups `task` under `process`, overriding the default
    /// one-task-per-process mapping a freshly registered task otherwise
    /// gets (see [`SimHost::process_of`]'s fallback).
    pub fn set_process(&self, task: HostTaskId, process: ProcessId) {
        self.inner.lock().unwrap().task_process.insert(task, process);
    }

    fn ensure(&self, inner: &mut Inner, task: HostTaskId) {
        inner.tasks.entry(task).or_insert_with(TaskRecord::new);
    }

    fn block_until(&self, task: HostTaskId) {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let rec = inner.tasks.get(&task).expect("registered task");
            if matches!(rec.state, HostTaskState::Running) {
                return;
            }
            inner = self.cv.wait(inner).unwrap();
        }
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Host for SimHost {
    fn register_task(&self, task: HostTaskId, cpu: PerCpuId) {
        let mut inner = self.inner.lock().unwrap();
        self.ensure(&mut inner, task);
        THIS_THREAD.with(|c| c.set(Some((task, cpu))));
    }

    fn current_task(&self) -> Option<HostTaskId> {
        THIS_THREAD.with(|c| c.get().map(|(t, _)| t))
    }

    /// Falls back to `ProcessId(task.0)` for a task never explicitly
    /// grouped via [`SimHost::set_process`] — good enough for the common
    /// one-task-per-process test shape without forcing every call site to
    /// declare a process up front.
    fn process_of(&self, task: HostTaskId) -> ProcessId {
        self.inner
            .lock()
            .unwrap()
            .task_process
            .get(&task)
            .copied()
            .unwrap_or(ProcessId(task.0))
    }

    fn current_cpu(&self) -> Option<PerCpuId> {
        THIS_THREAD.with(|c| c.get().map(|(_, cpu)| cpu))
    }

    fn grant_rt_caps(&self, process: ProcessId) {
        let mut inner = self.inner.lock().unwrap();
        inner.processes_cap_sys_nice.insert(process);
    }

    fn mlockall_active(&self, process: ProcessId) -> bool {
        self.inner.lock().unwrap().processes_mlockall.contains(&process)
    }

    fn has_cap_sys_nice(&self, process: ProcessId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .processes_cap_sys_nice
            .contains(&process)
    }

    fn in_rt_group(&self, process: ProcessId) -> bool {
        self.inner.lock().unwrap().processes_rt_group.contains(&process)
    }

    fn exe_path(&self, process: ProcessId) -> Option<String> {
        self.inner.lock().unwrap().exe_paths.get(&process).cloned()
    }

    fn task_state(&self, task: HostTaskId) -> HostTaskState {
        let mut inner = self.inner.lock().unwrap();
        self.ensure(&mut inner, task);
        inner.tasks[&task].state
    }

    fn set_interruptible(&self, task: HostTaskId, atomic_switch: bool) {
        let mut inner = self.inner.lock().unwrap();
        self.ensure(&mut inner, task);
        inner.tasks.get_mut(&task).unwrap().state = if atomic_switch {
            HostTaskState::InterruptibleAtomic
        } else {
            HostTaskState::Interruptible
        };
    }

    fn wake_task(&self, task: HostTaskId) {
        let mut inner = self.inner.lock().unwrap();
        self.ensure(&mut inner, task);
        inner.tasks.get_mut(&task).unwrap().state = HostTaskState::Running;
        self.cv.notify_all();
    }

    fn host_schedule(&self, task: HostTaskId) {
        self.block_until(task);
    }

    fn suspend_infinite(&self, task: HostTaskId) {
        {
            let mut inner = self.inner.lock().unwrap();
            self.ensure(&mut inner, task);
            inner.tasks.get_mut(&task).unwrap().state = HostTaskState::Interruptible;
        }
        self.block_until(task);
    }

    fn set_host_priority(&self, task: HostTaskId, priority: u32) {
        let clamped = if priority == 0 {
            0
        } else {
            priority.clamp(1, xeno_core::config::HOST_FIFO_MAX - 1)
        };
        let mut inner = self.inner.lock().unwrap();
        self.ensure(&mut inner, task);
        inner.tasks.get_mut(&task).unwrap().priority = clamped;
    }

    fn set_affinity(&self, task: HostTaskId, mask: u64) {
        let mut inner = self.inner.lock().unwrap();
        self.ensure(&mut inner, task);
        inner.tasks.get_mut(&task).unwrap().affinity = mask;
    }

    fn supports_mayday(&self) -> bool {
        self.supports_mayday
    }

    fn alloc_mayday_page(&self) -> Result<u64, CoreError> {
        if !self.supports_mayday {
            return Err(CoreError::NoResource);
        }
        // A fake but stable "address": any nonzero value models the page
        // being mapped, since this host has no real MMU to back it.
        let addr = self.mayday_addr.fetch_add(0x1000, Ordering::Relaxed) + 0x1000;
        Ok(addr)
    }

    fn arm_mayday(&self, task: HostTaskId) {
        let mut inner = self.inner.lock().unwrap();
        self.ensure(&mut inner, task);
        inner.tasks.get_mut(&task).unwrap().mayday_armed = true;
    }

    fn mayday_armed(&self, task: HostTaskId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .get(&task)
            .is_some_and(|t| t.mayday_armed)
    }

    fn disarm_mayday(&self, task: HostTaskId) {
        if let Some(rec) = self.inner.lock().unwrap().tasks.get_mut(&task) {
            rec.mayday_armed = false;
        }
    }

    fn send_signal(&self, task: HostTaskId, signal: Signal) {
        let mut inner = self.inner.lock().unwrap();
        self.ensure(&mut inner, task);
        let rec = inner.tasks.get_mut(&task).unwrap();
        rec.pending_signals.push(signal);
        if rec.state.is_interruptible() {
            rec.state = HostTaskState::Running;
            self.cv.notify_all();
        }
    }

    fn take_pending_signal(&self, task: HostTaskId) -> Option<Signal> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .get_mut(&task)
            .and_then(|t| t.pending_signals.pop())
    }

    fn has_pending_signal(&self, task: HostTaskId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .get(&task)
            .is_some_and(|t| !t.pending_signals.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_task_starts_running() {
        let host = SimHost::new(true);
        let task = HostTaskId(1);
        host.register_task(task, PerCpuId(0));
        assert_eq!(host.task_state(task), HostTaskState::Running);
    }

    #[test]
    fn wake_task_transitions_to_running() {
        let host = SimHost::new(true);
        let task = HostTaskId(1);
        host.set_interruptible(task, false);
        assert!(host.task_state(task).is_interruptible());
        host.wake_task(task);
        assert_eq!(host.task_state(task), HostTaskState::Running);
    }

    #[test]
    fn signal_wakes_an_interruptible_task() {
        let host = SimHost::new(true);
        let task = HostTaskId(1);
        host.set_interruptible(task, true);
        host.send_signal(task, Signal::Shadow);
        assert_eq!(host.task_state(task), HostTaskState::Running);
        assert!(host.has_pending_signal(task));
    }

    #[test]
    fn signal_does_not_wake_a_running_task_but_still_queues() {
        let host = SimHost::new(true);
        let task = HostTaskId(1);
        host.send_signal(task, Signal::Shadow);
        assert_eq!(host.task_state(task), HostTaskState::Running);
        assert!(host.has_pending_signal(task));
    }

    #[test]
    fn host_priority_clamps_into_sched_fifo_range() {
        let host = SimHost::new(true);
        let task = HostTaskId(1);
        host.set_host_priority(task, 0);
        host.set_host_priority(task, 1000);
        // No public getter beyond internal state; exercised via no panic
        // and the same task resolving consistently.
        assert_eq!(host.task_state(task), HostTaskState::Running);
    }

    #[test]
    fn mayday_unsupported_host_never_allocates_a_page() {
        let host = SimHost::new(false);
        assert!(!host.supports_mayday());
        assert_eq!(host.alloc_mayday_page(), Err(CoreError::NoResource));
    }

    #[test]
    fn host_schedule_blocks_until_woken_from_another_thread() {
        use std::sync::Arc;
        use std::thread;

        let host = Arc::new(SimHost::new(true));
        let task = HostTaskId(9);
        host.set_interruptible(task, false);

        let host2 = host.clone();
        let handle = thread::spawn(move || {
            host2.host_schedule(task);
        });

        thread::sleep(std::time::Duration::from_millis(20));
        host.wake_task(task);
        handle.join().unwrap();
    }
}
