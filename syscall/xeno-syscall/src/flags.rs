//! Per-syscall-table-entry flags controlling dispatch.

use bitflags::bitflags;

bitflags! {
    /// Flags attached to each syscall table entry, drawn from the set the
    /// migration engine's dispatcher understands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DispatchFlags: u16 {
        /// Caller must be a real-time shadow; otherwise `PERMISSION`.
        const SHADOW = 1 << 0;
        /// Run in whichever domain is current.
        const CURRENT = 1 << 1;
        /// Must run in host domain; relaxes-then-runs if caller is primary.
        const LOSTAGE = 1 << 2;
        /// Must run in real-time domain; hardens if caller is in host.
        const HISTAGE = 1 << 3;
        /// Pick `LOSTAGE` or `HISTAGE` automatically from caller state.
        const CONFORMING = 1 << 4;
        /// If the handler returns `NoSys`, switch domain and retry once.
        const ADAPTIVE = 1 << 5;
        /// After execution, return to the originating domain.
        const SWITCHBACK = 1 << 6;
        /// On signal interruption, report `EINTR` rather than restart.
        const NORESTART = 1 << 7;
    }
}
