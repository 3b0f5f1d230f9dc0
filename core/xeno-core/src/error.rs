//! Error kinds shared by every nucleus crate.
//!
//! A closed `enum`, a hand-written `Display` impl, no `thiserror`/`anyhow`.
//! `CoreError` is the common vocabulary; crate-specific errors (e.g.
//! `xeno_nucleus::mayday::MaydayError`) convert into it at module
//! boundaries via `From`.

use core::fmt;

/// The error kinds named by the migration engine's error design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// TCB allocation, PPD heap init, or mayday-page mapping failed.
    NoResource,
    /// A syscall handle resolved to nothing, or to the wrong magic/skin.
    BadHandle,
    /// A `SHADOW`-flagged call came from a non-shadow caller.
    DomainMismatch,
    /// A gatekeeper handoff was interrupted by a signal; caller should retry.
    SignalRestart,
    /// `sys_bind`'s feature or ABI check failed.
    AbiMismatch,
    /// Caller lacks the capability (or group membership) required to bind.
    PermissionDenied,
    /// No skin matches the requested magic.
    NoSuchSkin,
    /// A concurrent PPD insert raced this one; the loser tears down quietly.
    BindingBusy,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResource => f.write_str("no resource available"),
            Self::BadHandle => f.write_str("bad or stale handle"),
            Self::DomainMismatch => f.write_str("caller is not a real-time shadow"),
            Self::SignalRestart => f.write_str("interrupted by signal, restart"),
            Self::AbiMismatch => f.write_str("feature set or ABI revision mismatch"),
            Self::PermissionDenied => f.write_str("permission denied"),
            Self::NoSuchSkin => f.write_str("no skin registered for this magic"),
            Self::BindingBusy => f.write_str("a concurrent bind won the race"),
        }
    }
}

/// Logs a fatal-invariant breach through the ambient logger, then aborts.
///
/// A "diagnostic then abort" pattern for states that should never occur,
/// rather than a silent `unreachable!()`.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        $crate::kfatal!($($arg)*);
        panic!($($arg)*);
    }};
}
