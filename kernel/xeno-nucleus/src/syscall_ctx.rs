//! The nucleus's [`xeno_syscall::DispatchContext`] implementation.
//!
//! One `SyscallCtx` is built per intercepted syscall, resolving the calling
//! host task into a TCB handle once and reusing that resolution for every
//! query [`xeno_syscall::dispatch`] makes during that one call. Holds an
//! owned `Arc<Core>` rather than a borrow: `xeno_syscall::Handler<C>` is a
//! plain `fn` pointer with no per-call lifetime parameter, so the skin
//! table (`SyscallTable<SyscallCtx>`, registered once and kept for the
//! process's lifetime) needs a context type that isn't itself generic over
//! a borrow's lifetime.

use std::sync::Arc;

use xeno_core::error::CoreError;
use xeno_syscall::{DispatchContext, Domain, HandlerOutcome, MuxId};

use crate::core::Core;
use crate::mode;
use crate::tcb::{HostTaskId, ThreadState, TcbHandle};

/// Dispatch context for one syscall, bound to the calling host task.
pub struct SyscallCtx {
    core: Arc<Core>,
    host_task: HostTaskId,
    /// `None` for a bare host task that has never been mated to a TCB.
    handle: Option<TcbHandle>,
    /// The skin this call is routed through, set by the dispatch entry
    /// point before handing this context to [`xeno_syscall::dispatch`].
    /// `None` for contexts built directly by tests that never consult
    /// `propagate_to_host`'s pass-through hook.
    muxid: Option<MuxId>,
}

impl SyscallCtx {
    /// Resolves the calling host task (via `Host::current_task`) against
    /// `core`'s registry.
    pub fn current(core: &Arc<Core>) -> Option<Self> {
        let host_task = core.host().current_task()?;
        let handle = {
            let guard = core.lock();
            guard.registry.lookup(host_task)
        };
        Some(Self {
            core: core.clone(),
            host_task,
            handle,
            muxid: None,
        })
    }

    /// Builds a context for an already-resolved TCB, bypassing the
    /// registry lookup (used by tests and by handlers operating on a
    /// target other than the caller).
    pub fn for_handle(core: &Arc<Core>, host_task: HostTaskId, handle: TcbHandle) -> Self {
        Self {
            core: core.clone(),
            host_task,
            handle: Some(handle),
            muxid: None,
        }
    }

    /// Records which skin this call is routed through, so
    /// `propagate_to_host` can consult that skin's pass-through hook.
    pub fn set_muxid(&mut self, muxid: MuxId) {
        self.muxid = Some(muxid);
    }

    /// The resolved TCB handle, if this caller is a shadow.
    pub fn handle(&self) -> Option<TcbHandle> {
        self.handle
    }

    /// The `Core` this context dispatches against.
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// A cloned `Arc` to the `Core` this context dispatches against, for
    /// handlers that need to hand it on to a free function taking
    /// `&Arc<Core>` (e.g. [`crate::bind::sys_bind`]).
    pub fn core_arc(&self) -> Arc<Core> {
        self.core.clone()
    }

    /// The calling host task.
    pub fn host_task(&self) -> HostTaskId {
        self.host_task
    }
}

impl DispatchContext for SyscallCtx {
    fn core_active(&mut self) -> bool {
        self.core.is_active()
    }

    fn is_shadow(&mut self) -> bool {
        self.handle.is_some()
    }

    fn current_domain(&mut self) -> Domain {
        let Some(handle) = self.handle else {
            return Domain::Host;
        };
        let guard = self.core.lock();
        match guard.tcbs.get(handle) {
            Some(tcb) if tcb.state.contains(ThreadState::RELAXED) => Domain::Host,
            Some(_) => Domain::Primary,
            None => Domain::Host,
        }
    }

    fn harden(&mut self) -> Result<(), CoreError> {
        let handle = self.handle.ok_or(CoreError::DomainMismatch)?;
        mode::harden(&self.core, handle)
    }

    fn relax(&mut self) -> Result<(), CoreError> {
        // Unlike `harden`, a bare host task has nothing to relax: it is
        // already outside the real-time domain by construction, so the
        // dispatcher's post-handler "non-RT resource count hit zero, relax"
        // step (§4.6) is a no-op for it rather than a `DomainMismatch`.
        let Some(handle) = self.handle else {
            return Ok(());
        };
        mode::relax(&self.core, handle, None)
    }

    fn propagate_to_host(&mut self) -> HandlerOutcome {
        // This workspace models the host kernel's own syscall table as an
        // external collaborator (§1 non-goal); nothing here ever actually
        // runs a Linux syscall. A skin may still intercept the call via its
        // registered pass-through hook (§9 Open Question 3); absent that,
        // or absent a resolved muxid at all, this always reports NoSys.
        let hook = self.muxid.and_then(|muxid| {
            let guard = self.core.lock();
            guard.skins.get(muxid).map(|s| s.pass_through)
        });
        if let Some(hook) = hook {
            if let Some(outcome) = hook(self) {
                return outcome;
            }
        }
        HandlerOutcome::NoSys
    }

    fn pending_signal(&mut self) -> bool {
        self.core.host().has_pending_signal(self.host_task)
    }

    fn non_rt_resource_count_zero(&mut self) -> bool {
        // Non-shadow callers never hold real-time-tracked resources in
        // this workspace (no object-mapping skins are implemented).
        true
    }

    fn update_user_mirror(&mut self) {
        // No real user-mode mirror word exists without a host MMU (§1
        // non-goal); left as a hook for a future real `Host` impl.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::percpu::PerCpuId;
    use crate::sim_host::SimHost;
    use crate::skin::MagicId;
    use crate::tcb::{InfoFlags, SchedClass, Tcb, TcbStats};

    fn make_core() -> Arc<Core> {
        Core::new(Arc::new(SimHost::new(true)), 1)
    }

    #[test]
    fn bare_host_task_is_not_a_shadow() {
        let core = make_core();
        let task = HostTaskId(1);
        core.host().register_task(task, PerCpuId(0));
        let mut ctx = SyscallCtx::current(&core).unwrap();
        assert!(!ctx.is_shadow());
        assert_eq!(ctx.current_domain(), Domain::Host);
    }

    #[test]
    fn mated_shadow_reports_its_current_domain() {
        let core = make_core();
        let task = HostTaskId(2);
        core.host().register_task(task, PerCpuId(0));
        let handle = {
            let mut guard = core.lock();
            let h = guard.tcbs.insert(Tcb {
                magic: MagicId(1),
                process: crate::ppd::ProcessId(1),
                host_task: task,
                state: ThreadState::empty(),
                info: InfoFlags::empty(),
                priority: 10,
                base_priority: 10,
                sched_class: SchedClass::Fifo,
                affinity: u64::MAX,
                cpu: PerCpuId(0),
                rpi_linked: false,
                stats: TcbStats::default(),
            });
            guard.registry.bind(task, h).unwrap();
            h
        };

        let mut ctx = SyscallCtx::for_handle(&core, task, handle);
        assert!(ctx.is_shadow());
        assert_eq!(ctx.current_domain(), Domain::Primary);
    }
}
