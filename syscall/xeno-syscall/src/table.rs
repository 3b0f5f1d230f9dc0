//! Skin syscall tables.

use crate::{DispatchFlags, HandlerOutcome};

/// Up to five operand registers, mirroring the syscall surface's ABI.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallArgs(pub [u64; 5]);

/// A syscall handler: takes the dispatch context and the raw operands.
pub type Handler<C> = fn(&mut C, &SyscallArgs) -> HandlerOutcome;

struct Entry<C> {
    flags: DispatchFlags,
    handler: Handler<C>,
}

/// A skin's syscall table, indexed by operation number.
pub struct SyscallTable<C> {
    entries: Vec<Entry<C>>,
}

impl<C> SyscallTable<C> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Appends a handler, returning its assigned operation index.
    pub fn push(&mut self, flags: DispatchFlags, handler: Handler<C>) -> u32 {
        self.entries.push(Entry { flags, handler });
        (self.entries.len() - 1) as u32
    }

    /// Looks up the flags and handler for operation `op`.
    pub fn lookup(&self, op: u32) -> Option<(DispatchFlags, Handler<C>)> {
        self.entries.get(op as usize).map(|e| (e.flags, e.handler))
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no operations are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for SyscallTable<C> {
    fn default() -> Self {
        Self::new()
    }
}
