//! Skin-agnostic syscall dispatch and domain classification.
//!
//! This crate owns the generic dispatch algorithm (§4.6 of the migration
//! engine's design) without depending on the concrete TCB/Core types that
//! live in `xeno-nucleus` — the nucleus implements [`DispatchContext`] for
//! its own caller representation and hands it to [`dispatch`]. Keeping the
//! dependency edge this direction (syscall dispatch knows nothing about
//! thread internals) keeps the dispatch trait in its own crate, with the
//! kernel crate providing the concrete implementation.

mod flags;
mod table;

pub use flags::DispatchFlags;
pub use table::{Handler, SyscallTable};

use xeno_core::error::CoreError;

/// Which scheduling domain a caller currently executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Under the real-time scheduler.
    Primary,
    /// Under the host scheduler.
    Host,
}

/// Numeric identifier of a registered skin.
pub type MuxId = u32;
/// Index of an operation within a skin's syscall table.
pub type OpIndex = u32;

/// A skin-supplied override consulted via [`DispatchContext::propagate_to_host`]
/// whenever a `LOSTAGE` handler itself returns [`HandlerOutcome::NoSys`].
///
/// Returning `Some` intercepts the call instead of letting it reach the
/// host kernel's own syscall table; the default a skin gets if it never
/// overrides this at registration time is `|_| None`, i.e. always pass
/// through unconditionally.
pub type PassThroughHook<C> = fn(&mut C) -> Option<HandlerOutcome>;

/// Outcome of invoking a syscall handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler ran to completion with this return value.
    Done(i64),
    /// The handler doesn't implement this call in the current domain. A
    /// plain `LOSTAGE` handler's `NoSys` falls straight through to
    /// [`DispatchContext::propagate_to_host`]. Under `ADAPTIVE`, `NoSys`
    /// instead retries the handler once after toggling `LOSTAGE` to
    /// `HISTAGE` (or vice versa); only if that retry *also* returns
    /// `NoSys` does a `LOSTAGE`-flagged handler then fall back to
    /// `propagate_to_host` (a `HISTAGE`-flagged handler simply reports
    /// `NoSys` up to the caller, since there is no host-side dispatcher to
    /// fall back to from the real-time domain).
    NoSys,
}

/// Errors the dispatcher itself can surface, distinct from a handler's own
/// return value (which is opaque to the dispatcher beyond `NoSys`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// `muxid`/`op` did not resolve to a registered handler.
    NoSys,
    /// `SHADOW` flag set, caller is not a shadow.
    Permission,
    /// A domain switch failed (signal, or `Host` error), caller should retry.
    Restart,
    /// Same as `Restart` but the handler's `NORESTART` flag requests this be
    /// reported as `EINTR` instead of asking the caller to retry.
    Interrupted,
    /// Core is not active; the call never reached this dispatcher.
    CoreInactive,
    /// A lower-level error from the caller's domain transitions.
    Core(CoreError),
}

impl From<CoreError> for DispatchError {
    fn from(e: CoreError) -> Self {
        Self::Core(e)
    }
}

/// The capabilities `dispatch` needs from its caller representation.
///
/// `xeno-nucleus` implements this for its own per-thread dispatch context;
/// this trait is the seam that keeps this crate free of nucleus internals.
pub trait DispatchContext {
    /// Whether the nucleus core is active at all (§4.6: "if !core_active").
    fn core_active(&mut self) -> bool;
    /// Whether the caller is a real-time shadow (as opposed to a bare host task).
    fn is_shadow(&mut self) -> bool;
    /// The domain the caller currently executes in.
    fn current_domain(&mut self) -> Domain;
    /// Moves the caller from relaxed to primary. `Err` means the domain
    /// switch failed (signal interruption) and dispatch should restart.
    fn harden(&mut self) -> Result<(), CoreError>;
    /// Moves the caller from primary to relaxed.
    fn relax(&mut self) -> Result<(), CoreError>;
    /// Hands the call to the host kernel's own syscall table (used when a
    /// `LOSTAGE` call is already running host-side, or a skin's
    /// pass-through hook accepts it).
    fn propagate_to_host(&mut self) -> HandlerOutcome;
    /// `true` if a signal is pending for this caller.
    fn pending_signal(&mut self) -> bool;
    /// `true` if the caller is not a real-time-class thread and its
    /// resource-tracking count (e.g. outstanding mapped objects) is zero.
    fn non_rt_resource_count_zero(&mut self) -> bool;
    /// Refreshes the user-mode mirror word after a dispatch completes.
    fn update_user_mirror(&mut self);
}

/// Classifies and routes one intercepted syscall per §4.6's algorithm.
///
/// `flags` is the registered handler's flag set; `handler` is called with
/// `ctx` each time the loop decides to actually execute it (once, or twice
/// under `ADAPTIVE` retry).
pub fn dispatch<C: DispatchContext>(
    ctx: &mut C,
    flags: DispatchFlags,
    mut handler: impl FnMut(&mut C) -> HandlerOutcome,
) -> Result<i64, DispatchError> {
    if !ctx.core_active() {
        return match ctx.propagate_to_host() {
            HandlerOutcome::Done(v) => Ok(v),
            HandlerOutcome::NoSys => Err(DispatchError::CoreInactive),
        };
    }

    if flags.contains(DispatchFlags::SHADOW) && !ctx.is_shadow() {
        return Err(DispatchError::Permission);
    }

    let mut lostage = flags.contains(DispatchFlags::LOSTAGE);
    let mut histage = flags.contains(DispatchFlags::HISTAGE);
    if flags.contains(DispatchFlags::CONFORMING) {
        histage = ctx.is_shadow();
        lostage = !histage;
    }

    let mut switched = false;
    let mut retried = false;
    let outcome = loop {
        if lostage && ctx.current_domain() == Domain::Primary {
            ctx.relax()?;
            switched = true;
            continue;
        }
        // HISTAGE hardens a host-domain caller into primary before running
        // the handler there, symmetric with the LOSTAGE branch above.
        if histage && ctx.current_domain() == Domain::Host {
            ctx.harden()?;
            switched = true;
            continue;
        }

        let result = handler(ctx);
        if matches!(result, HandlerOutcome::NoSys) {
            if flags.contains(DispatchFlags::LOSTAGE)
                && (!flags.contains(DispatchFlags::ADAPTIVE) || retried)
            {
                // A LOSTAGE handler that doesn't implement this call hands
                // it to the host kernel's own syscall table (or a skin's
                // pass-through hook) -- unless ADAPTIVE still owes us a
                // retry in the other domain first (checked below).
                break ctx.propagate_to_host();
            }
            if flags.contains(DispatchFlags::ADAPTIVE) && !retried {
                retried = true;
                // Toggle LOSTAGE <-> HISTAGE; the branches above will switch
                // domain to match before the next handler call.
                core::mem::swap(&mut lostage, &mut histage);
                continue;
            }
        }
        break result;
    };

    let is_shadow = ctx.is_shadow();
    let restart_requested = if is_shadow && ctx.pending_signal() {
        true
    } else {
        if !is_shadow && ctx.non_rt_resource_count_zero() {
            ctx.relax()?;
        }
        false
    };

    if flags.contains(DispatchFlags::SWITCHBACK) && switched {
        match ctx.current_domain() {
            Domain::Primary => ctx.relax()?,
            Domain::Host => ctx.harden()?,
        }
    }

    ctx.update_user_mirror();

    if restart_requested {
        return Err(if flags.contains(DispatchFlags::NORESTART) {
            DispatchError::Interrupted
        } else {
            DispatchError::Restart
        });
    }

    match outcome {
        HandlerOutcome::Done(v) => Ok(v),
        HandlerOutcome::NoSys => Err(DispatchError::NoSys),
    }
}
