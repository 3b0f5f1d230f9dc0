//! End-to-end scenario 1 (§8): a process binds the
//! "native" skin, creates a shadow at priority 50, and drives it through
//! a syscall that hardens on entry followed by one that relaxes with a
//! `SIGDEBUG(MigrateSyscall)` when the trap-on-switch bit is armed.

use std::sync::Arc;

use xeno_nucleus::bind::{sys_bind, BindRequest, ABI_REVISION};
use xeno_nucleus::core::Core;
use xeno_nucleus::dispatch::handle_syscall;
use xeno_nucleus::percpu::PerCpuId;
use xeno_nucleus::ppd::ProcessId;
use xeno_nucleus::signal::{DebugReason, Signal};
use xeno_nucleus::sim_host::SimHost;
use xeno_nucleus::skin::{MagicId, PpdState, SkinCallbacks};
use xeno_nucleus::tcb::{HostTaskId, InfoFlags, SchedClass, Tcb, TcbStats, ThreadState};
use xeno_core::error::CoreError;
use xeno_syscall::{DispatchFlags, HandlerOutcome, SyscallArgs, SyscallTable};

const NATIVE_MAGIC: MagicId = MagicId(0x454E_4154);

struct NativeCallbacks;
impl SkinCallbacks for NativeCallbacks {
    fn attach(&self, _process: ProcessId) -> Result<Option<PpdState>, CoreError> {
        Ok(None)
    }
    fn detach(&self, _process: ProcessId, _state: Option<PpdState>) {}
}

fn rt_task_sleep(_ctx: &mut xeno_nucleus::syscall_ctx::SyscallCtx, _args: &SyscallArgs) -> HandlerOutcome {
    HandlerOutcome::Done(0)
}

fn read_op(_ctx: &mut xeno_nucleus::syscall_ctx::SyscallCtx, _args: &SyscallArgs) -> HandlerOutcome {
    HandlerOutcome::Done(0)
}

#[test]
fn simple_harden_relax_roundtrip() {
    let sim_host = Arc::new(SimHost::new(true));
    let core = Core::new(sim_host.clone(), 1);
    core.start();

    let process = ProcessId(1);
    sim_host.set_cap_sys_nice(process, true);

    let mut table = SyscallTable::new();
    let op_sleep = table.push(DispatchFlags::HISTAGE | DispatchFlags::CONFORMING, rt_task_sleep);
    let op_read = table.push(DispatchFlags::LOSTAGE, read_op);

    let muxid = {
        let mut guard = core.lock();
        guard
            .skins
            .register("native", NATIVE_MAGIC, table, Arc::new(NativeCallbacks))
            .unwrap()
    };

    let (_info, result) = sys_bind(
        &core,
        process,
        BindRequest {
            magic: NATIVE_MAGIC,
            requested: 0,
            mandatory: 0,
            abi_rev: ABI_REVISION,
        },
    );
    assert_eq!(result, Ok(muxid));

    let host_task = HostTaskId(1);
    core.host().register_task(host_task, PerCpuId(0));
    sim_host.set_process(host_task, process);
    let handle = {
        let mut guard = core.lock();
        let h = guard.tcbs.insert(Tcb {
            magic: NATIVE_MAGIC,
            process,
            host_task,
            state: ThreadState::RELAXED | ThreadState::MAPPED,
            info: InfoFlags::empty(),
            priority: 50,
            base_priority: 50,
            sched_class: SchedClass::Fifo,
            affinity: u64::MAX,
            cpu: PerCpuId(0),
            rpi_linked: false,
            stats: TcbStats::default(),
        });
        guard.registry.bind(host_task, h).unwrap();
        h
    };

    // rt_task_sleep is CONFORMING for a shadow, i.e. HISTAGE: it hardens
    // the caller on entry.
    let result = handle_syscall(&core, muxid, op_sleep, &SyscallArgs::default());
    assert_eq!(result, Ok(0));
    {
        let guard = core.lock();
        let tcb = guard.tcbs.get(handle).unwrap();
        assert!(!tcb.state.contains(ThreadState::RELAXED), "must be primary after rt_task_sleep");
    }

    // Arm trap-on-switch as if the process had requested mode-switch
    // warnings, then issue a LOSTAGE call ("read"): it must relax and
    // carry SIGDEBUG(MigrateSyscall) since TRAPSW was set.
    {
        let mut guard = core.lock();
        guard.tcbs.get_mut(handle).unwrap().state.insert(ThreadState::TRAP_ON_SWITCH);
    }

    let result = handle_syscall(&core, muxid, op_read, &SyscallArgs::default());
    assert_eq!(result, Ok(0));
    {
        let guard = core.lock();
        let tcb = guard.tcbs.get(handle).unwrap();
        assert!(tcb.state.contains(ThreadState::RELAXED), "must be relaxed after read()");
    }
    assert!(core.host().has_pending_signal(host_task));
    assert_eq!(
        core.host().take_pending_signal(host_task),
        Some(Signal::Debug(DebugReason::MigrateSyscall))
    );

    core.shutdown();
}
