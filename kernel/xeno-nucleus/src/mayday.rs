//! Mayday trap facility (§4.5).
//!
//! Exactly one kernel page, allocated lazily on first use and shared
//! read-execute across every real-time-capable process thereafter. This
//! workspace has no real MMU, so "mapped into every process" becomes a
//! shared, reference-counted [`MaydayPage`] handle — one per [`crate::core::Core`]
//! — handed to every PPD that asks for it, matching the "single
//! allocation, shared thereafter" shape §3 calls for.

use std::sync::OnceLock;

use xeno_core::error::CoreError;

use crate::host::Host;
use crate::tcb::HostTaskId;

/// Errors the mayday facility can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaydayError {
    /// This `Host` reports `supports_mayday() == false` (§4.5's
    /// `!XNARCH_HAVE_MAYDAY` fallback).
    Unsupported,
    /// The page could not be allocated.
    NoResource,
}

impl From<CoreError> for MaydayError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NoResource => Self::NoResource,
            _ => Self::NoResource,
        }
    }
}

/// The one process-wide mayday page: a kernel-allocated, read-execute
/// page containing architecture-specific code that issues the "mayday"
/// syscall when control is redirected to it.
pub struct MaydayPage {
    addr: u64,
}

impl MaydayPage {
    /// The page's address, as handed out to processes that map it.
    pub fn addr(&self) -> u64 {
        self.addr
    }
}

/// Owns the lazily-allocated, process-wide [`MaydayPage`] for one [`crate::core::Core`].
#[derive(Default)]
pub struct MaydayFacility {
    page: OnceLock<std::sync::Arc<MaydayPage>>,
}

impl MaydayFacility {
    /// Creates a facility with no page allocated yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared mayday page, allocating it on first call.
    ///
    /// Fails with [`MaydayError::Unsupported`] without ever allocating if
    /// `host.supports_mayday()` is `false`.
    pub fn page(&self, host: &dyn Host) -> Result<std::sync::Arc<MaydayPage>, MaydayError> {
        if !host.supports_mayday() {
            return Err(MaydayError::Unsupported);
        }
        if let Some(page) = self.page.get() {
            return Ok(page.clone());
        }
        let addr = host.alloc_mayday_page()?;
        let page = std::sync::Arc::new(MaydayPage { addr });
        // `OnceLock::get_or_init` would re-call `alloc_mayday_page` under
        // racing threads before discarding the loser; fine here since the
        // allocation is pure bookkeeping, not a real page fault.
        Ok(self.page.get_or_init(|| page).clone())
    }
}

/// Arms the mayday trap on `task`, per §4.3.3 kick: "the next return-to
/// -user crossing executes the mayday syscall and relaxes there."
///
/// A no-op (the caller should have already checked) if the host does not
/// support mayday at all.
pub fn arm(host: &dyn Host, task: HostTaskId) {
    if host.supports_mayday() {
        host.arm_mayday(task);
    }
}

/// Handles entry to the mayday syscall itself (§4.5): the host redirected
/// control here because the trap was armed. Disarms the trap; the caller
/// (the syscall dispatcher) is responsible for then relaxing the thread,
/// since fixing up the interrupted register context and resuming the
/// normal syscall epilogue is what actually triggers the relax.
pub fn enter(host: &dyn Host, task: HostTaskId) -> Result<(), MaydayError> {
    if !host.supports_mayday() {
        return Err(MaydayError::Unsupported);
    }
    host.disarm_mayday(task);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_host::SimHost;

    #[test]
    fn page_is_allocated_lazily_and_shared() {
        let host = SimHost::new(true);
        let facility = MaydayFacility::new();
        assert!(facility.page.get().is_none());
        let a = facility.page(&host).unwrap();
        let b = facility.page(&host).unwrap();
        assert_eq!(a.addr(), b.addr());
    }

    #[test]
    fn unsupported_host_never_allocates() {
        let host = SimHost::new(false);
        let facility = MaydayFacility::new();
        assert_eq!(facility.page(&host), Err(MaydayError::Unsupported));
    }

    #[test]
    fn arm_then_enter_disarms() {
        let host = SimHost::new(true);
        let task = HostTaskId(1);
        arm(&host, task);
        assert!(host.mayday_armed(task));
        enter(&host, task).unwrap();
        assert!(!host.mayday_armed(task));
    }

    #[test]
    fn arm_is_noop_on_unsupported_host() {
        let host = SimHost::new(false);
        let task = HostTaskId(1);
        arm(&host, task);
        assert!(!host.mayday_armed(task));
        assert_eq!(enter(&host, task), Err(MaydayError::Unsupported));
    }
}
