//! The bootstrap "sys" skin, registered under muxid 0 by [`crate::core::Core::start`].
//!
//! Skin 0 is not special-cased dispatch machinery, it is simply the first
//! skin ever registered, answering exactly one call (`sys_bind`) and owning
//! the two pieces of per-process state every other skin's PPD implicitly
//! depends on existing first — the mayday-page handle and the process's
//! executable path (§4.7).

use std::sync::Arc;

use xeno_core::error::CoreError;
use xeno_syscall::{DispatchFlags, HandlerOutcome, SyscallArgs, SyscallTable};

use crate::core::Core;
use crate::ppd::{ProcessId, SYS_MUXID};
use crate::skin::{PpdState, SkinCallbacks};
use crate::syscall_ctx::SyscallCtx;

/// Operation index of `sys_bind` within the sys skin's own table.
///
/// Kept to one entry: this workspace routes `bind::sys_bind` to callers
/// directly rather than through a wire-format operand struct, since no
/// other sys-skin call is in scope (§1 non-goal: no ABI marshalling layer).
pub const OP_BIND: u32 = 0;

/// Per-process state the sys skin's PPD carries: the mayday-page handle
/// (lazily shared, see [`crate::mayday::MaydayFacility`]) and the process's
/// executable path, surfaced here only for diagnostics.
pub struct SysPpdState {
    /// This process's handle onto the one shared mayday page, if the host
    /// supports mayday at all.
    pub mayday_page: Option<Arc<crate::mayday::MaydayPage>>,
    /// The process's executable path, as reported by the host.
    pub exe_path: Option<String>,
}

struct SysCallbacks {
    core: std::sync::Weak<Core>,
}

impl SkinCallbacks for SysCallbacks {
    fn attach(&self, process: ProcessId) -> Result<Option<PpdState>, CoreError> {
        let Some(core) = self.core.upgrade() else {
            return Ok(None);
        };
        let mayday_page = core.mayday.page(core.host().as_ref()).ok();
        let exe_path = core.host().exe_path(process);
        let state = SysPpdState { mayday_page, exe_path };
        Ok(Some(Box::new(state)))
    }

    fn detach(&self, _process: ProcessId, _state: Option<PpdState>) {
        // Nothing beyond dropping the boxed state: the mayday page is
        // reference-counted and outlives any one process's PPD.
    }
}

fn sys_bind_handler(ctx: &mut SyscallCtx, args: &SyscallArgs) -> HandlerOutcome {
    let process = ctx.core().host().process_of(ctx.host_task());
    let req = crate::bind::BindRequest {
        magic: crate::skin::MagicId(args.0[0] as u32),
        requested: args.0[1] as u32,
        mandatory: args.0[2] as u32,
        abi_rev: args.0[3] as u32,
    };
    let core = ctx.core_arc();
    let (_info, result) = crate::bind::sys_bind(&core, process, req);
    match result {
        Ok(muxid) => HandlerOutcome::Done(muxid as i64),
        Err(_) => HandlerOutcome::NoSys,
    }
}

/// Registers the bootstrap "sys" skin against `core`, assigning it muxid 0
/// (`crate::ppd::SYS_MUXID`/`SYS_MUX_INDEX`). Idempotent only in the sense
/// that calling it twice registers two skins; callers (just
/// [`Core::start`] and this crate's own test helpers) must call it at most
/// once per `Core`.
pub fn register(core: &Arc<Core>) {
    let mut table: SyscallTable<SyscallCtx> = SyscallTable::new();
    let op = table.push(DispatchFlags::CURRENT, sys_bind_handler);
    debug_assert_eq!(op, OP_BIND);

    let callbacks = Arc::new(SysCallbacks {
        core: Arc::downgrade(core),
    });

    let mut guard = core.lock();
    let muxid = guard
        .skins
        .register("sys", SYS_MUXID, table, callbacks)
        .expect("sys skin must be the first skin registered");
    debug_assert_eq!(muxid, crate::ppd::SYS_MUX_INDEX);
}
