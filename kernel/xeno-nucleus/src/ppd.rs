//! Per-Process Descriptors: one per (process, skin) binding.
//!
//! PPDs are kept in a `BTreeMap<(MmId, MuxId), Ppd>` ordered descending on
//! `muxid` within each process, so a sweep of one process's PPDs walks a
//! single contiguous run in iteration order without any separate bucket
//! chaining or hashing step.

use std::collections::BTreeMap;
use std::sync::Arc;

use xeno_core::error::CoreError;

use crate::mayday::MaydayPage;
use crate::skin::PpdState;

/// Opaque identity of a host process's memory-management context (`mm`).
///
/// Stands in for a `struct mm_struct *` on a real host kernel; the nucleus
/// only ever needs it as an equality/ordering key, never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// The well-known muxid of the bootstrap "sys" skin (§4.7).
pub const SYS_MUXID: crate::skin::MagicId = crate::skin::MagicId(0);
pub(crate) const SYS_MUX_INDEX: xeno_syscall::MuxId = 0;

/// One (process, skin) descriptor.
///
/// Invariant (§3): the PPD for skin 0 ("sys") is the root; every other
/// PPD of a process holds a reference to it and cannot outlive it —
/// enforced here by [`PpdHash::remove`] refusing to drop the sys-PPD
/// while sibling PPDs for the same process remain.
pub struct Ppd {
    process: ProcessId,
    muxid: xeno_syscall::MuxId,
    refcount: u32,
    /// Opaque per-skin state returned by that skin's `attach` callback.
    pub state: Option<PpdState>,
    /// Set only on the sys-PPD: this process's mayday-page handle.
    pub mayday_page: Option<Arc<MaydayPage>>,
    /// Set only on the sys-PPD: the process's executable path, for
    /// diagnostics only.
    pub exe_path: Option<String>,
}

impl Ppd {
    fn new(process: ProcessId, muxid: xeno_syscall::MuxId) -> Self {
        Self {
            process,
            muxid,
            refcount: 1,
            state: None,
            mayday_page: None,
            exe_path: None,
        }
    }

    /// The process this descriptor belongs to.
    pub fn process(&self) -> ProcessId {
        self.process
    }

    /// The skin this descriptor is for.
    pub fn muxid(&self) -> xeno_syscall::MuxId {
        self.muxid
    }

    /// Current reference count.
    pub fn refcount(&self) -> u32 {
        self.refcount
    }
}

/// The process-wide PPD index (§3 "PPD hash").
///
/// Guarded by the `Core`-wide lock at the call site, per §5.
#[derive(Default)]
pub struct PpdHash {
    by_key: BTreeMap<(ProcessId, std::cmp::Reverse<xeno_syscall::MuxId>), Ppd>,
}

impl PpdHash {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(process: ProcessId, muxid: xeno_syscall::MuxId) -> (ProcessId, std::cmp::Reverse<xeno_syscall::MuxId>) {
        (process, std::cmp::Reverse(muxid))
    }

    /// Creates a new PPD for `(process, muxid)` with refcount 1.
    ///
    /// Fails with `BindingBusy` if a concurrent insert already created one
    /// (the loser tears its attach down silently, per §7).
    pub fn insert(&mut self, process: ProcessId, muxid: xeno_syscall::MuxId) -> Result<(), CoreError> {
        let key = Self::key(process, muxid);
        if self.by_key.contains_key(&key) {
            return Err(CoreError::BindingBusy);
        }
        self.by_key.insert(key, Ppd::new(process, muxid));
        Ok(())
    }

    /// Borrows the PPD for `(process, muxid)`, if it exists.
    pub fn get(&self, process: ProcessId, muxid: xeno_syscall::MuxId) -> Option<&Ppd> {
        self.by_key.get(&Self::key(process, muxid))
    }

    /// Mutably borrows the PPD for `(process, muxid)`, if it exists.
    pub fn get_mut(&mut self, process: ProcessId, muxid: xeno_syscall::MuxId) -> Option<&mut Ppd> {
        self.by_key.get_mut(&Self::key(process, muxid))
    }

    /// Bumps the refcount of an existing PPD.
    pub fn retain(&mut self, process: ProcessId, muxid: xeno_syscall::MuxId) {
        if let Some(ppd) = self.get_mut(process, muxid) {
            ppd.refcount += 1;
        }
    }

    /// Drops a reference to `(process, muxid)`'s PPD, removing it once the
    /// count reaches zero. Refuses to remove the sys-PPD (`muxid == 0`)
    /// while any sibling PPD for the same process still exists.
    pub fn release(&mut self, process: ProcessId, muxid: xeno_syscall::MuxId) -> bool {
        let Some(ppd) = self.get_mut(process, muxid) else {
            return false;
        };
        ppd.refcount = ppd.refcount.saturating_sub(1);
        if ppd.refcount > 0 {
            return false;
        }
        if muxid == SYS_MUX_INDEX && self.process_muxids_descending(process).len() > 1 {
            // Root PPD outlives its siblings; restore the reference we just
            // dropped so the invariant holds until they are gone too.
            self.get_mut(process, muxid).unwrap().refcount = 1;
            return false;
        }
        self.by_key.remove(&Self::key(process, muxid));
        true
    }

    /// Every muxid this process has a live PPD for, in descending order —
    /// the exact sweep order `CLEANUP`/`unbind_all` must use (§4.7).
    pub fn process_muxids_descending(&self, process: ProcessId) -> Vec<xeno_syscall::MuxId> {
        self.by_key
            .range((process, std::cmp::Reverse(xeno_syscall::MuxId::MAX))..)
            .take_while(|((p, _), _)| *p == process)
            .map(|((_, std::cmp::Reverse(m)), _)| *m)
            .collect()
    }

    /// Iterates over every live PPD, for invariant checks that must hold
    /// across the whole index rather than one `(process, muxid)` at a time.
    pub fn iter(&self) -> impl Iterator<Item = &Ppd> {
        self.by_key.values()
    }

    /// Removes every PPD belonging to `process` unconditionally, in
    /// descending-muxid order (called after detach callbacks have run).
    /// A no-op on the second call for the same process (§8 idempotence).
    pub fn sweep_process(&mut self, process: ProcessId) -> Vec<xeno_syscall::MuxId> {
        let muxids = self.process_muxids_descending(process);
        for muxid in &muxids {
            self.by_key.remove(&Self::key(process, *muxid));
        }
        muxids
    }
}
