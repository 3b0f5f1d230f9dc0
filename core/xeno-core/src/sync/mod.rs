//! Synchronization primitives shared across the nucleus crates.

mod irq_spinlock;
mod lockdep;
mod semaphore;
mod spinlock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use lockdep::{assert_core_lock_not_held, core_lock_held, CoreLockMarker};
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard};
