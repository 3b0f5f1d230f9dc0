//! `SIGDEBUG`/`SIGSHADOW` reason codes.
//!
//! A real `SIGDEBUG` delivery reports these through `si_int`; this
//! workspace keeps the same closed set of reasons but hands them to
//! [`crate::host::Host::send_signal`] as a plain enum rather than packing
//! them into a signal-info payload, since there is no real `siginfo_t` on
//! a `Host` that isn't Linux.

/// A reason code carried by a `SIGDEBUG` delivery.
///
/// `Watchdog` and `MigratePrioInv` cover a watchdog-triggered mayday and
/// relaxing while a real-time mutex is held, respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugReason {
    /// A host signal caused a relax.
    MigrateSignal,
    /// A host syscall caused a relax.
    MigrateSyscall,
    /// The process lacks `mlockall`; real-time guarantees are void.
    NoMlock,
    /// The watchdog mayday'd a primary-mode thread that ran too long.
    Watchdog,
    /// Relaxed while holding a real-time mutex, risking priority inversion.
    MigratePrioInv,
}

/// A signal the nucleus can ask the host to deliver to a shadow's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `SIGDEBUG`, carrying a [`DebugReason`].
    Debug(DebugReason),
    /// `SIGSHADOW`, reserved for internal priority/hardening requests.
    Shadow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_distinguishable() {
        assert_ne!(DebugReason::Watchdog, DebugReason::MigratePrioInv);
        assert_eq!(
            Signal::Debug(DebugReason::NoMlock),
            Signal::Debug(DebugReason::NoMlock)
        );
    }
}
