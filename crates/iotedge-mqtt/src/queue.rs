//! Per-session message queue with exclusive drain.
//!
//! Inbound messages that arrive while a session is still being set up are
//! parked here. The queue co-owns each message from [`enqueue`] until it is
//! either processed by [`try_drain`] or discarded by [`release`]; in both
//! cases it is popped first and then released exactly once.
//!
//! Enqueue is lock-free. Pops go through a short critical section so that
//! [`snapshot`] can view the pending messages in order without taking them.
//!
//! [`enqueue`]: SessionMessageQueue::enqueue
//! [`try_drain`]: SessionMessageQueue::try_drain
//! [`release`]: SessionMessageQueue::release
//! [`snapshot`]: SessionMessageQueue::snapshot

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use iotedge_core::Releasable;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Result of a drain attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// This caller drained the queue until it was observed empty
    Drained {
        /// Messages handed to the processor
        processed: usize,
        /// Of those, how many the processor reported as failed
        failed: usize,
    },
    /// Another caller holds the drain; retry later
    Busy,
}

impl DrainOutcome {
    /// Messages handed to the processor, zero when busy
    #[must_use]
    pub const fn processed(self) -> usize {
        match self {
            Self::Drained { processed, .. } => processed,
            Self::Busy => 0,
        }
    }

    /// Whether another drainer was active
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Releases its message when dropped, panics included
struct ReleaseOnDrop<M: Releasable>(Option<M>);

impl<M: Releasable> ReleaseOnDrop<M> {
    fn message(&self) -> Option<&M> {
        self.0.as_ref()
    }
}

impl<M: Releasable> Drop for ReleaseOnDrop<M> {
    fn drop(&mut self) {
        if let Some(message) = self.0.take() {
            message.release();
        }
    }
}

/// Unbounded FIFO of messages owned by one session
pub struct SessionMessageQueue<M: Releasable> {
    messages: SegQueue<M>,
    // Older than everything in `messages`; filled only by `snapshot`.
    front: Mutex<VecDeque<M>>,
    pending: AtomicUsize,
    drain_lock: Mutex<()>,
}

impl<M: Releasable> fmt::Debug for SessionMessageQueue<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMessageQueue")
            .field("pending", &self.len())
            .field("draining", &self.is_draining())
            .finish()
    }
}

impl<M: Releasable> Default for SessionMessageQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Releasable> SessionMessageQueue<M> {
    /// Empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: SegQueue::new(),
            front: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            drain_lock: Mutex::new(()),
        }
    }

    /// Append `message`, taking a reference on it. Never blocks.
    pub fn enqueue(&self, message: M) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        message.retain();
        self.messages.push(message);
    }

    /// Process queued messages in order if no other caller is draining.
    ///
    /// Returns [`DrainOutcome::Busy`] immediately when another drain is in
    /// progress. Every popped message is released after `processor` returns,
    /// whether it succeeded, failed or panicked.
    pub fn try_drain<F, E>(&self, mut processor: F) -> DrainOutcome
    where
        F: FnMut(&M) -> Result<(), E>,
        E: fmt::Display,
    {
        let mut processed = 0;
        let mut failed = 0;

        // Re-check after unlocking: an enqueue racing the end of a drain
        // would otherwise sit in the queue until the next drain call.
        while !self.is_empty() {
            let Some(_drain) = self.drain_lock.try_lock() else {
                if processed == 0 {
                    return DrainOutcome::Busy;
                }
                break;
            };

            while let Some(message) = self.pop() {
                let guard = ReleaseOnDrop(Some(message));
                if let Some(message) = guard.message() {
                    if let Err(err) = processor(message) {
                        failed += 1;
                        warn!(error = %err, "failed to process queued message");
                    }
                }
                processed += 1;
            }
        }

        if processed > 0 {
            debug!(processed, failed, "drained session queue");
        }
        DrainOutcome::Drained { processed, failed }
    }

    /// Discard and release every queued message without processing it.
    ///
    /// Returns how many messages were discarded.
    pub fn release(&self) -> usize {
        let mut discarded = 0;
        while let Some(message) = self.pop() {
            message.release();
            discarded += 1;
        }
        if discarded > 0 {
            warn!(discarded, "unprocessed messages left in the queue were released");
        }
        discarded
    }

    /// View of every pending message in queue order.
    ///
    /// `view` only borrows each message; ownership stays with the queue. A
    /// message being processed by a drain is no longer pending.
    pub fn snapshot<R>(&self, view: impl FnMut(&M) -> R) -> Vec<R> {
        let mut front = self.front.lock();
        while let Some(message) = self.messages.pop() {
            front.push_back(message);
        }
        front.iter().map(view).collect()
    }

    fn pop(&self) -> Option<M> {
        let mut front = self.front.lock();
        let message = front.pop_front().or_else(|| self.messages.pop())?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(message)
    }

    /// Messages enqueued and not yet popped
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.front.lock().is_empty()
    }

    /// Whether a drain currently holds the queue
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.drain_lock.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use iotedge_core::{BufferLease, InboundMessage};

    fn message(topic: &str) -> (InboundMessage, BufferLease) {
        let lease = BufferLease::new();
        (
            InboundMessage::new(topic, Bytes::from_static(b"{}"), lease.clone()),
            lease,
        )
    }

    #[test]
    fn test_fifo_within_drain() {
        let queue = SessionMessageQueue::new();
        let (m1, _) = message("first");
        let (m2, _) = message("second");
        queue.enqueue(m1);
        queue.enqueue(m2);

        let mut seen = Vec::new();
        let outcome = queue.try_drain(|m: &InboundMessage| {
            seen.push(m.topic.clone());
            Ok::<_, String>(())
        });

        assert_eq!(outcome, DrainOutcome::Drained { processed: 2, failed: 0 });
        assert_eq!(seen, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_failed_message_still_released() {
        let queue = SessionMessageQueue::new();
        let (m, lease) = message("t");
        queue.enqueue(m);
        assert_eq!(lease.ref_count(), 2);

        let outcome = queue.try_drain(|_| Err("boom"));

        assert_eq!(outcome, DrainOutcome::Drained { processed: 1, failed: 1 });
        assert_eq!(lease.ref_count(), 1);
    }

    #[test]
    fn test_busy_when_lock_held() {
        let queue = SessionMessageQueue::new();
        let (m, lease) = message("t");
        queue.enqueue(m);

        let held = queue.drain_lock.lock();
        assert!(queue.is_draining());
        assert_eq!(queue.try_drain(|_| Ok::<_, String>(())), DrainOutcome::Busy);
        drop(held);

        assert_eq!(queue.len(), 1);
        assert_eq!(lease.ref_count(), 2);
        assert_eq!(queue.try_drain(|_| Ok::<_, String>(())).processed(), 1);
    }

    #[test]
    fn test_snapshot_keeps_order_and_ownership() {
        let queue = SessionMessageQueue::new();
        let (m1, l1) = message("first");
        let (m2, _) = message("second");
        queue.enqueue(m1);
        queue.enqueue(m2);

        assert_eq!(queue.snapshot(|m| m.topic.clone()), vec!["first", "second"]);

        let (m3, _) = message("third");
        queue.enqueue(m3);
        assert_eq!(queue.len(), 3);
        assert_eq!(l1.ref_count(), 2);

        let mut seen = Vec::new();
        queue.try_drain(|m: &InboundMessage| {
            seen.push(m.topic.clone());
            Ok::<_, String>(())
        });
        assert_eq!(seen, vec!["first", "second", "third"]);
        assert!(queue.snapshot(|m| m.topic.clone()).is_empty());
        assert_eq!(l1.ref_count(), 1);
    }

    #[test]
    fn test_release_discards_everything() {
        let queue = SessionMessageQueue::new();
        let leases: Vec<_> = (0..3)
            .map(|i| {
                let (m, lease) = message(&format!("t{i}"));
                queue.enqueue(m);
                lease
            })
            .collect();

        assert_eq!(queue.release(), 3);
        assert!(queue.is_empty());
        assert!(leases.iter().all(|l| l.ref_count() == 1));
        assert_eq!(queue.release(), 0);
    }
}
