use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;
use uuid::Uuid;

use crate::delta::Delta;

/// A bounded per-subscriber outbound delta buffer (§4.1 Fan-out discipline).
/// Pushing never blocks the producer: if the buffer is full, a normal delta
/// would ordinarily drop the oldest entry, but this would risk discarding a
/// buffered full-status snapshot — so instead the whole buffer collapses
/// into one fresh full snapshot, supplied lazily by the caller. This keeps
/// the bound on memory while guaranteeing every subscriber eventually
/// catches up to a consistent view (§8 "Subscriber fan-out is lossless for
/// full-status snapshots").
pub struct SubscriberBuffer {
    id: Uuid,
    capacity: usize,
    queue: Mutex<VecDeque<Delta>>,
    notify: Notify,
}

impl SubscriberBuffer {
    /// A new, empty buffer bounded to `capacity` entries.
    pub fn new(id: Uuid, capacity: usize) -> Self {
        Self {
            id,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// This subscriber's id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Push `delta`. If the buffer is at capacity, collapse it to a single
    /// fresh full-status snapshot obtained from `full_snapshot` instead of
    /// dropping anything that might itself be a snapshot.
    pub fn push(&self, delta: Delta, full_snapshot: impl FnOnce() -> Delta) {
        let mut queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if queue.len() < self.capacity {
            queue.push_back(delta);
        } else {
            queue.clear();
            queue.push_back(full_snapshot());
        }
        drop(queue);
        self.notify.notify_one();
    }

    /// Pop the next delta to send, waiting if the buffer is currently empty.
    pub async fn recv(&self) -> Delta {
        loop {
            if let Some(delta) =
                self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pop_front()
            {
                return delta;
            }
            self.notify.notified().await;
        }
    }

    /// Current buffered length, for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Whether the buffer is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
