//! Skin registration (§4.6 `register_interface`, §4.7 PPD lifecycle).
//!
//! A skin's callbacks are a small fixed capability set — `{attach, detach}`
//! — per the design notes, modeled as a trait object rather than runtime
//! reflection. The syscall table itself is plain data (`xeno_syscall::
//! SyscallTable`), not part of the trait, since it has no behavior beyond
//! being looked up by operation index.

use std::sync::Arc;

use xeno_core::error::CoreError;
use xeno_syscall::{MuxId, SyscallTable};

use crate::ppd::ProcessId;
use crate::syscall_ctx::SyscallCtx;

/// Magic constant identifying a skin, used by `sys_bind` to find it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MagicId(pub u32);

/// Opaque per-(process, skin) state returned by [`SkinCallbacks::attach`].
pub type PpdState = Box<dyn std::any::Any + Send + Sync>;

/// The per-process event callbacks a skin must provide.
///
/// `attach` runs on the first syscall a process makes to this skin;
/// `detach` runs when the process tears down (or on `exec`).
pub trait SkinCallbacks: Send + Sync {
    /// Creates this skin's per-process state for `process`. Returning
    /// `Ok(None)` means "no state needed" (the PPD still exists, empty).
    fn attach(&self, process: ProcessId) -> Result<Option<PpdState>, CoreError>;
    /// Flushes all of this skin's objects owned by `process`.
    fn detach(&self, process: ProcessId, state: Option<PpdState>);
}

/// A registered skin: its identity, syscall table, and lifecycle callbacks.
pub struct RegisteredSkin {
    /// Assigned numeric identifier used to route syscalls to this skin.
    pub muxid: MuxId,
    /// Human-readable name (e.g. `"native"`, `"posix"`, `"sys"`).
    pub name: &'static str,
    /// Magic constant identifying the skin.
    pub magic: MagicId,
    /// The skin's syscall table.
    pub table: SyscallTable<SyscallCtx>,
    /// Per-process lifecycle callbacks.
    pub callbacks: Arc<dyn SkinCallbacks>,
    /// Consulted before a `LOSTAGE` call reaches the host kernel's own
    /// syscall table (§9 Open Question 3). Defaults to `|_| None`.
    pub pass_through: xeno_syscall::PassThroughHook<SyscallCtx>,
}

/// The process-wide table of registered skins.
///
/// Registration is serialized by `registration_mutex` at the `Core` level
/// (never held during syscalls, per §5); `MAX_SKINS` bounds its size.
#[derive(Default)]
pub struct SkinTable {
    skins: Vec<RegisteredSkin>,
}

impl SkinTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new skin, assigning it the next free `muxid`, with the
    /// default pass-through behavior (always propagate to the host).
    ///
    /// Fails with `CoreError::NoResource` once `xeno_core::config::MAX_SKINS`
    /// skins are registered.
    pub fn register(
        &mut self,
        name: &'static str,
        magic: MagicId,
        table: SyscallTable<SyscallCtx>,
        callbacks: Arc<dyn SkinCallbacks>,
    ) -> Result<MuxId, CoreError> {
        self.register_with_pass_through(name, magic, table, callbacks, |_| None)
    }

    /// Same as [`SkinTable::register`], but lets the skin override the
    /// `LOSTAGE` pass-through hook at registration time (§9 Open Question 3).
    pub fn register_with_pass_through(
        &mut self,
        name: &'static str,
        magic: MagicId,
        table: SyscallTable<SyscallCtx>,
        callbacks: Arc<dyn SkinCallbacks>,
        pass_through: xeno_syscall::PassThroughHook<SyscallCtx>,
    ) -> Result<MuxId, CoreError> {
        if self.skins.len() >= xeno_core::config::MAX_SKINS {
            return Err(CoreError::NoResource);
        }
        let muxid = self.skins.len() as MuxId;
        self.skins.push(RegisteredSkin {
            muxid,
            name,
            magic,
            table,
            callbacks,
            pass_through,
        });
        Ok(muxid)
    }

    /// Finds a registered skin by its bind-time magic constant.
    pub fn find_by_magic(&self, magic: MagicId) -> Option<&RegisteredSkin> {
        self.skins.iter().find(|s| s.magic == magic)
    }

    /// Looks up a registered skin by `muxid`.
    pub fn get(&self, muxid: MuxId) -> Option<&RegisteredSkin> {
        self.skins.get(muxid as usize)
    }

    /// Muxids of every registered skin, in descending order — the order
    /// `CLIENT_DETACH` must be invoked in during process teardown (§4.7).
    pub fn muxids_descending(&self) -> Vec<MuxId> {
        let mut ids: Vec<MuxId> = self.skins.iter().map(|s| s.muxid).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }
}
