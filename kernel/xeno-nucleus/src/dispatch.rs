//! The syscall entry point: resolves `(muxid, op)` against the skin table
//! and hands the call to [`xeno_syscall::dispatch`] (§4.6).
//!
//! `xeno-syscall` owns the generic classify-and-route algorithm;
//! this module owns resolving which handler it runs against, matching
//! the crate split described in `lib.rs`.

use std::sync::Arc;

use xeno_syscall::{DispatchError, SyscallArgs};

use crate::core::Core;
use crate::syscall_ctx::SyscallCtx;

/// Dispatches one intercepted syscall identified by `(muxid, op)` against
/// the calling host task, resolved fresh from `core`'s registry.
///
/// Returns `DispatchError::NoSys` both for an unresolved caller (no current
/// host task known to `Host::current_task`) and for an unregistered
/// `(muxid, op)` pair: both cases share the same `-ENOSYS` exit.
pub fn handle_syscall(
    core: &Arc<Core>,
    muxid: xeno_syscall::MuxId,
    op: u32,
    args: &SyscallArgs,
) -> Result<i64, DispatchError> {
    let mut ctx = SyscallCtx::current(core).ok_or(DispatchError::NoSys)?;
    ctx.set_muxid(muxid);
    let (flags, handler) = {
        let guard = core.lock();
        guard.skins.get(muxid).and_then(|skin| skin.table.lookup(op))
    }
    .ok_or(DispatchError::NoSys)?;
    xeno_syscall::dispatch(&mut ctx, flags, |c| handler(c, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::percpu::PerCpuId;
    use crate::ppd::ProcessId;
    use crate::sim_host::SimHost;
    use crate::skin::{MagicId, SkinCallbacks};
    use crate::sysskin;
    use xeno_core::error::CoreError;
    use xeno_syscall::{DispatchFlags, HandlerOutcome};

    fn make_core() -> Arc<Core> {
        let core = Core::new(Arc::new(SimHost::new(true)), 1);
        sysskin::register(&core);
        core
    }

    struct NoopCallbacks;
    impl SkinCallbacks for NoopCallbacks {
        fn attach(&self, _process: ProcessId) -> Result<Option<crate::skin::PpdState>, CoreError> {
            Ok(None)
        }
        fn detach(&self, _process: ProcessId, _state: Option<crate::skin::PpdState>) {}
    }

    fn echo(_ctx: &mut SyscallCtx, args: &SyscallArgs) -> HandlerOutcome {
        HandlerOutcome::Done(args.0[0] as i64)
    }

    #[test]
    fn unregistered_op_is_nosys() {
        let core = make_core();
        let task = crate::tcb::HostTaskId(1);
        core.host().register_task(task, PerCpuId(0));
        let result = handle_syscall(&core, 0, 999, &SyscallArgs::default());
        assert_eq!(result, Err(DispatchError::NoSys));
    }

    #[test]
    fn no_current_task_is_nosys() {
        let core = make_core();
        let result = handle_syscall(&core, 0, 0, &SyscallArgs::default());
        assert_eq!(result, Err(DispatchError::NoSys));
    }

    #[test]
    fn registered_handler_runs_and_returns_its_value() {
        let core = make_core();
        let task = crate::tcb::HostTaskId(1);
        core.host().register_task(task, PerCpuId(0));

        let mut table = xeno_syscall::SyscallTable::new();
        table.push(DispatchFlags::CURRENT, echo);
        let muxid = {
            let mut guard = core.lock();
            guard
                .skins
                .register("test", MagicId(0xABCD), table, Arc::new(NoopCallbacks))
                .unwrap()
        };

        let result = handle_syscall(&core, muxid, 0, &SyscallArgs([42, 0, 0, 0, 0]));
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn pass_through_hook_intercepts_lostage_host_domain_call() {
        let core = make_core();
        let task = crate::tcb::HostTaskId(2);
        core.host().register_task(task, PerCpuId(0));

        fn always_nosys(_ctx: &mut SyscallCtx, _args: &SyscallArgs) -> HandlerOutcome {
            HandlerOutcome::NoSys
        }
        fn hook(_ctx: &mut SyscallCtx) -> Option<HandlerOutcome> {
            Some(HandlerOutcome::Done(7))
        }

        let mut table = xeno_syscall::SyscallTable::new();
        table.push(DispatchFlags::LOSTAGE, always_nosys);
        let muxid = {
            let mut guard = core.lock();
            guard
                .skins
                .register_with_pass_through(
                    "test",
                    MagicId(0xBEEF),
                    table,
                    Arc::new(NoopCallbacks),
                    hook,
                )
                .unwrap()
        };

        let result = handle_syscall(&core, muxid, 0, &SyscallArgs::default());
        assert_eq!(result, Ok(7));
    }
}
