//! Bounded snapshot handoff between the audio thread and the sender thread
//!
//! # Real-Time Safety
//!
//! - **No allocations**: the ring is allocated once at construction
//! - **Never waits**: `push` is O(1); when full it displaces the oldest entry
//! - **FIFO**: entries come out in push order, none duplicated
//!
//! Dropping the oldest entry (rather than the incoming one) keeps the
//! freshest transport state observable when the sender falls behind.
//!
//! The consumer sleeps on a [`SnapshotWaiter`] that every push unparks,
//! so a snapshot is picked up immediately instead of after a poll interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use crossbeam::sync::{Parker, Unparker};

use crate::types::TransportSnapshot;

/// Default number of snapshots buffered before dropping
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Bounded FIFO of transport snapshots
pub struct SnapshotQueue {
    entries: ArrayQueue<TransportSnapshot>,
    dropped: AtomicU64,
    unparker: Unparker,
}

/// Consumer-side wake handle (owned by the sender thread)
pub struct SnapshotWaiter {
    parker: Parker,
}

impl SnapshotQueue {
    /// Create a queue and its paired waiter
    ///
    /// A zero capacity is raised to 1.
    pub fn with_capacity(capacity: usize) -> (Arc<Self>, SnapshotWaiter) {
        let parker = Parker::new();
        let queue = Self {
            entries: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
            unparker: parker.unparker().clone(),
        };
        (Arc::new(queue), SnapshotWaiter { parker })
    }

    /// Append a snapshot (non-blocking, RT-safe)
    ///
    /// Returns the displaced oldest snapshot if the queue was full.
    pub fn push(&self, snapshot: TransportSnapshot) -> Option<TransportSnapshot> {
        let displaced = self.entries.force_push(snapshot);
        if displaced.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.unparker.unpark();
        displaced
    }

    /// Remove the oldest snapshot, if any
    pub fn pop(&self) -> Option<TransportSnapshot> {
        self.entries.pop()
    }

    /// Discard everything still queued, returning how many were removed
    pub fn drain(&self) -> usize {
        std::iter::from_fn(|| self.entries.pop()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Number of snapshots displaced by overload since construction
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wake the consumer without pushing (used for shutdown)
    pub fn wake(&self) {
        self.unparker.unpark();
    }
}

impl SnapshotWaiter {
    /// Sleep until a push or `wake`, or until `timeout` elapses
    ///
    /// A push that happened since the last wait returns immediately.
    pub fn wait(&self, timeout: Duration) {
        self.parker.park_timeout(timeout);
    }
}
