//! Debug-only lock-ordering assertions.
//!
//! The RPI tracker's remote-clear path must never run while the caller
//! holds the global `Core` lock: the IPI handler on the remote CPU
//! re-acquires both its own per-CPU queue lock and, transitively, the
//! global lock, so a caller already holding the global lock risks a
//! lock-order inversion. Rather than trust every call site to remember
//! this, every
//! [`IrqSpinLock`](super::IrqSpinLock) acquisition bumps a thread-local
//! depth counter that callers of lock-ordering-sensitive code can check.

use std::cell::Cell;

thread_local! {
    static CORE_LOCK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII marker pushed while the caller holds the `Core`'s global lock.
///
/// `Core::with_locked` wraps every acquisition of its `IrqSpinLock` in one
/// of these so nested code can call [`assert_core_lock_not_held`].
pub struct CoreLockMarker {
    _private: (),
}

impl CoreLockMarker {
    /// Records that the global lock was just taken on this thread.
    pub fn enter() -> Self {
        CORE_LOCK_DEPTH.with(|d| d.set(d.get() + 1));
        Self { _private: () }
    }
}

impl Drop for CoreLockMarker {
    fn drop(&mut self) {
        CORE_LOCK_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Returns `true` if the current thread holds the `Core` global lock.
pub fn core_lock_held() -> bool {
    CORE_LOCK_DEPTH.with(|d| d.get() > 0)
}

/// Panics if the current thread holds the `Core` global lock.
///
/// Intended for entry points (like RPI's remote-clear) that are only sound
/// to run lock-free; only active in debug builds, matching the cost
/// profile of a `lockdep`-gated assertion.
#[track_caller]
pub fn assert_core_lock_not_held() {
    if cfg!(debug_assertions) && core_lock_held() {
        panic!("called with the Core global lock held: would risk a lock-order inversion against a remote-CPU handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_depth_across_nesting() {
        assert!(!core_lock_held());
        let outer = CoreLockMarker::enter();
        assert!(core_lock_held());
        {
            let inner = CoreLockMarker::enter();
            assert!(core_lock_held());
            drop(inner);
        }
        assert!(core_lock_held());
        drop(outer);
        assert!(!core_lock_held());
    }

    #[test]
    #[should_panic(expected = "lock-order inversion")]
    fn assert_not_held_panics_when_held() {
        let _marker = CoreLockMarker::enter();
        assert_core_lock_not_held();
    }
}
