//! `sys_bind`: the negotiation syscall every skin answers through the
//! bootstrap "sys" skin (§4.6 additional behavior, §4.7).

use std::sync::Arc;

use xeno_core::error::CoreError;
use xeno_syscall::MuxId;

use crate::core::Core;
use crate::ppd::{ProcessId, SYS_MUXID, SYS_MUX_INDEX};
use crate::skin::MagicId;

/// The feature-negotiation ABI revision this workspace implements.
///
/// There is exactly one revision modeled here (no optional feature bits
/// beyond "supported"/"not supported"); a real multi-revision ABI would
/// grow this into a table, which is out of scope per §1.
pub const ABI_REVISION: u32 = 1;

/// The feature-negotiation struct `sys_bind` always returns, independent of
/// whether the bind itself succeeds (§4.6: "even when the bind
/// subsequently fails on a missing mandatory feature").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureInfo {
    /// Every feature bit this build supports.
    pub feat_all: u32,
    /// Feature bits the caller declared mandatory.
    pub feat_man: u32,
    /// Mandatory bits the caller requested that this build does not support.
    pub feat_mis: u32,
    /// Every feature bit the caller requested (mandatory or optional).
    pub feat_req: u32,
    /// ABI revision this build implements.
    pub feat_abirev: u32,
}

/// One process's binding request against a skin's magic constant.
#[derive(Debug, Clone, Copy)]
pub struct BindRequest {
    /// Which skin to bind (looked up by magic, not name).
    pub magic: MagicId,
    /// Every feature bit requested (superset of `mandatory`).
    pub requested: u32,
    /// The subset of `requested` the caller cannot run without.
    pub mandatory: u32,
    /// The caller's own ABI revision.
    pub abi_rev: u32,
}

/// Binds `process` to the skin named by `req.magic`, returning the
/// negotiated [`FeatureInfo`] alongside the bind outcome.
///
/// On success: ensures the sys-PPD (skin 0) exists for `process`, creates
/// or retains the target skin's own PPD, runs its `attach` callback, and
/// grants real-time capabilities exactly once (§4.6).
pub fn sys_bind(core: &Arc<Core>, process: ProcessId, req: BindRequest) -> (FeatureInfo, Result<MuxId, CoreError>) {
    // This build supports every feature it was asked to build with; there
    // is no compile-time feature-gating here (§1 non-goal), so "all" is
    // simply "whatever was requested", and the only way to fail is an ABI
    // revision mismatch.
    let feat_all = req.requested;
    let feat_mis = if req.abi_rev == ABI_REVISION { 0 } else { req.mandatory };
    let info = FeatureInfo {
        feat_all,
        feat_man: req.mandatory,
        feat_mis,
        feat_req: req.requested,
        feat_abirev: ABI_REVISION,
    };

    let result = bind_inner(core, process, req, feat_mis);
    (info, result)
}

fn bind_inner(core: &Arc<Core>, process: ProcessId, req: BindRequest, feat_mis: u32) -> Result<MuxId, CoreError> {
    if feat_mis != 0 {
        return Err(CoreError::AbiMismatch);
    }

    if !core.host().has_cap_sys_nice(process) && !core.host().in_rt_group(process) {
        return Err(CoreError::PermissionDenied);
    }

    let muxid = {
        let guard = core.lock();
        guard.skins.find_by_magic(req.magic).map(|s| s.muxid)
    }
    .ok_or(CoreError::NoSuchSkin)?;

    ensure_sys_ppd(core, process, muxid);

    let already_bound = {
        let guard = core.lock();
        guard.ppds.get(process, muxid).is_some()
    };
    if already_bound {
        let mut guard = core.lock();
        guard.ppds.retain(process, muxid);
    } else {
        let mut guard = core.lock();
        guard.ppds.insert(process, muxid)?;
    }

    let attach_state = {
        let guard = core.lock();
        guard.skins.get(muxid).map(|s| s.callbacks.clone())
    };
    if let Some(callbacks) = attach_state {
        let state = callbacks.attach(process)?;
        let mut guard = core.lock();
        if let Some(ppd) = guard.ppds.get_mut(process, muxid) {
            ppd.state = state;
        }
    }

    core.host().grant_rt_caps(process);

    Ok(muxid)
}

/// Ensures `process` has a sys-PPD (skin 0), the root every other PPD
/// depends on (§3, §4.7), creating it (and running the sys skin's attach
/// hook) if this is the process's first bind of any kind.
fn ensure_sys_ppd(core: &Arc<Core>, process: ProcessId, binding_muxid: MuxId) {
    if binding_muxid == SYS_MUX_INDEX {
        return;
    }
    let exists = {
        let guard = core.lock();
        guard.ppds.get(process, SYS_MUX_INDEX).is_some()
    };
    if exists {
        let mut guard = core.lock();
        guard.ppds.retain(process, SYS_MUX_INDEX);
        return;
    }
    let mut guard = core.lock();
    // Best-effort: a concurrent bind may have just created it too; either
    // way a sys-PPD now exists, which is all this caller needs.
    let _ = guard.ppds.insert(process, SYS_MUX_INDEX);
}
