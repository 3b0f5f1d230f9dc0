//! Low-stage request ring (§3 "Low-stage request queue").
//!
//! A per-CPU, power-of-two, single-producer/single-consumer ring of
//! pending host-domain actions queued from real-time context. Producers
//! are real-time context (no locking, since there is exactly one); the
//! consumer is an asynchronous procedure call the host side runs later
//! (here: whatever calls [`LoStageRing::drain`]). §5 requires a
//! write-before-index-advance barrier so the consumer never observes a
//! half-written slot; `Ordering::Release`/`Acquire` on the index words
//! give exactly that without a lock.

use std::sync::atomic::{AtomicUsize, Ordering};

use xeno_core::config::LOSTAGE_RING_SIZE;

use crate::tcb::{HostTaskId, TcbHandle};

/// One pending host-domain action, queued from real-time context.
///
/// Closed enum with exactly the five kinds named in §3 — a non-exhaustive
/// match on this type is a compile error if the set ever needs to grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoStageRequest {
    /// Wake a host task that is blocked waiting on the real-time side.
    WakeTask(HostTaskId),
    /// Start a host task that has not yet run.
    StartTask(HostTaskId),
    /// Unmap a TCB whose host task has already exited.
    UnmapTcb(TcbHandle),
    /// Deliver a signal to a single shadow's host task.
    SignalThread(HostTaskId, crate::signal::Signal),
    /// Deliver a signal to every task in a thread group.
    SignalGroup(crate::ppd::ProcessId, crate::signal::Signal),
}

struct Slot {
    // Only valid once `write` has passed this index; readers must not
    // look at `value` until they have observed the corresponding advance.
    value: std::sync::Mutex<Option<LoStageRequest>>,
}

/// A fixed-capacity SPSC ring of [`LoStageRequest`]s for one CPU.
///
/// §8 invariant 4: the ring never overflows
/// (`|ring.in - ring.out| < RING_SIZE` at all times); a violation panics
/// rather than silently corrupting or dropping a request.
pub struct LoStageRing {
    slots: Box<[Slot]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl LoStageRing {
    /// Creates an empty ring with [`LOSTAGE_RING_SIZE`] slots.
    pub fn new() -> Self {
        let slots = (0..LOSTAGE_RING_SIZE)
            .map(|_| Slot {
                value: std::sync::Mutex::new(None),
            })
            .collect();
        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Enqueues `req`. Panics (per invariant 4) rather than overflow.
    pub fn push(&self, req: LoStageRequest) {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.slots.len() {
            xeno_core::fatal!("low-stage ring overflow: would corrupt a pending request");
        }
        let idx = tail % self.slots.len();
        *self.slots[idx].value.lock().unwrap() = Some(req);
        // Publish the write before advancing the index the consumer polls.
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
    }

    /// Drains every pending request, oldest first.
    pub fn drain(&self) -> Vec<LoStageRequest> {
        let mut out = Vec::new();
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            if head == tail {
                break;
            }
            let idx = head % self.slots.len();
            let req = self.slots[idx].value.lock().unwrap().take();
            self.head.store(head.wrapping_add(1), Ordering::Release);
            if let Some(req) = req {
                out.push(req);
            }
        }
        out
    }

    /// `true` if no request is currently queued.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }
}

impl Default for LoStageRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ring_is_empty() {
        let ring = LoStageRing::new();
        assert!(ring.is_empty());
        assert!(ring.drain().is_empty());
    }

    #[test]
    fn push_then_drain_preserves_fifo_order() {
        let ring = LoStageRing::new();
        ring.push(LoStageRequest::WakeTask(HostTaskId(1)));
        ring.push(LoStageRequest::StartTask(HostTaskId(2)));
        let drained = ring.drain();
        assert_eq!(
            drained,
            vec![
                LoStageRequest::WakeTask(HostTaskId(1)),
                LoStageRequest::StartTask(HostTaskId(2)),
            ]
        );
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_can_be_refilled_after_a_drain() {
        let ring = LoStageRing::new();
        for i in 0..(ring.capacity() * 2) {
            ring.push(LoStageRequest::WakeTask(HostTaskId(i as u64)));
            assert_eq!(ring.drain().len(), 1);
        }
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn overflow_panics_instead_of_corrupting() {
        let ring = LoStageRing::new();
        for i in 0..=ring.capacity() {
            ring.push(LoStageRequest::WakeTask(HostTaskId(i as u64)));
        }
    }
}
