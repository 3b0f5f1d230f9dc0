//! End-to-end scenario 4 (§8): root-priority inheritance
//! tracks each CPU's relaxed real-time threads independently — boosting
//! one CPU's root surrogate must never affect another CPU's, and hardening
//! a thread back out must drop its CPU's boost without touching the rest.

use std::sync::Arc;

use xeno_nucleus::core::{gatekeeper_task, Core};
use xeno_nucleus::mode;
use xeno_nucleus::percpu::PerCpuId;
use xeno_nucleus::ppd::ProcessId;
use xeno_nucleus::sim_host::SimHost;
use xeno_nucleus::skin::MagicId;
use xeno_nucleus::tcb::{HostTaskId, InfoFlags, SchedClass, Tcb, TcbStats, ThreadState};

fn insert(core: &Core, host_task: HostTaskId, cpu: PerCpuId, priority: u32) -> xeno_nucleus::tcb::TcbHandle {
    core.host().register_task(host_task, cpu);
    let mut guard = core.lock();
    guard.tcbs.insert(Tcb {
        magic: MagicId(1),
        process: ProcessId(1),
        host_task,
        state: ThreadState::MAPPED,
        info: InfoFlags::empty(),
        priority,
        base_priority: priority,
        sched_class: SchedClass::Fifo,
        affinity: u64::MAX,
        cpu,
        rpi_linked: false,
        stats: TcbStats::default(),
    })
}

#[test]
fn root_priority_is_tracked_independently_per_cpu() {
    let sim_host = Arc::new(SimHost::new(true));
    let core = Core::new(sim_host.clone(), 2);
    core.start();

    let cpu0 = PerCpuId(0);
    let cpu1 = PerCpuId(1);

    let a = insert(&core, HostTaskId(1), cpu0, 30);
    let b = insert(&core, HostTaskId(2), cpu1, 60);

    mode::relax(&core, a, None).unwrap();
    assert_eq!(sim_host.priority_of(gatekeeper_task(cpu0)), Some(30));
    assert_eq!(sim_host.priority_of(gatekeeper_task(cpu1)), Some(0));

    mode::relax(&core, b, None).unwrap();
    assert_eq!(sim_host.priority_of(gatekeeper_task(cpu0)), Some(30));
    assert_eq!(sim_host.priority_of(gatekeeper_task(cpu1)), Some(60));

    mode::harden(&core, a).unwrap();
    assert_eq!(sim_host.priority_of(gatekeeper_task(cpu0)), Some(0));
    assert_eq!(sim_host.priority_of(gatekeeper_task(cpu1)), Some(60));

    mode::harden(&core, b).unwrap();
    assert_eq!(sim_host.priority_of(gatekeeper_task(cpu0)), Some(0));
    assert_eq!(sim_host.priority_of(gatekeeper_task(cpu1)), Some(0));

    core.debug_assert_invariants();
    core.shutdown();
}
