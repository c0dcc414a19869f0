//! Per-role FIFO subtask queues with claim leases (§3 "Queue per role", §4.1,
//! §5). Re-architected from a single dependency-graph queue (the teacher's
//! `TaskQueue`) into three independent role-scoped FIFOs, because this
//! system's roles never depend on each other's completion order — only a
//! subtask's own lease does.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use orc_core::Role;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

/// A worker's temporary exclusive hold on a subtask (§3 "Queue per role").
#[derive(Debug, Clone)]
pub struct Claim {
    /// When the claim was taken (or last heartbeat-renewed).
    pub claimed_at: DateTime<Utc>,
    /// Opaque identity of the worker holding the claim.
    pub worker: String,
}

#[derive(Default)]
struct RoleQueueInner {
    pending: VecDeque<Uuid>,
    processing: HashMap<Uuid, Claim>,
}

/// One role's FIFO pending queue plus its processing claim-set.
struct RoleQueue {
    inner: RwLock<RoleQueueInner>,
    notify: Notify,
}

impl RoleQueue {
    fn new() -> Self {
        Self {
            inner: RwLock::new(RoleQueueInner::default()),
            notify: Notify::new(),
        }
    }
}

/// The three independent per-role queues, in the fixed lock-acquisition
/// order from §5: executor, tester, documenter.
pub struct QueueSet {
    executor: RoleQueue,
    tester: RoleQueue,
    documenter: RoleQueue,
}

impl QueueSet {
    /// An empty queue set for all three roles.
    pub fn new() -> Self {
        Self {
            executor: RoleQueue::new(),
            tester: RoleQueue::new(),
            documenter: RoleQueue::new(),
        }
    }

    fn queue(&self, role: Role) -> &RoleQueue {
        match role {
            Role::Executor => &self.executor,
            Role::Tester => &self.tester,
            Role::Documenter => &self.documenter,
        }
    }

    /// Append a subtask id to the tail of its role's pending queue (§5 "strict
    /// FIFO on enqueue order") and wake one waiting claimant, if any.
    pub async fn enqueue(&self, role: Role, id: Uuid) {
        let queue = self.queue(role);
        queue.inner.write().await.pending.push_back(id);
        queue.notify.notify_one();
    }

    /// Atomically pop the head of `role`'s pending queue and transition it to
    /// processing under a fresh claim. Never returns the same id to two
    /// callers (§4.1 "Never returns the same id to two workers") because the
    /// pop and the claim insert happen under one write-lock hold.
    ///
    /// If the queue is empty, suspends until either an id arrives or
    /// `poll_timeout` elapses, then returns `None` — the caller re-asks, per
    /// §4.1's worker-poll-timeout suspension point.
    pub async fn claim_next(
        &self,
        role: Role,
        worker: impl Into<String>,
        poll_timeout: Duration,
    ) -> Option<Uuid> {
        let queue = self.queue(role);
        let worker = worker.into();

        if let Some(id) = Self::try_claim(queue, &worker).await {
            return Some(id);
        }

        let notified = queue.notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(poll_timeout) => {}
        }

        Self::try_claim(queue, &worker).await
    }

    async fn try_claim(queue: &RoleQueue, worker: &str) -> Option<Uuid> {
        let mut inner = queue.inner.write().await;
        let id = inner.pending.pop_front()?;
        inner.processing.insert(
            id,
            Claim {
                claimed_at: Utc::now(),
                worker: worker.to_string(),
            },
        );
        Some(id)
    }

    /// Renew a claim's lease (§4.3 "the lease renews on heartbeat"). No-op if
    /// the id isn't currently claimed on this role's queue.
    pub async fn renew_claim(&self, role: Role, id: Uuid) {
        let queue = self.queue(role);
        let mut inner = queue.inner.write().await;
        if let Some(claim) = inner.processing.get_mut(&id) {
            claim.claimed_at = Utc::now();
        }
    }

    /// Drop a claim once its subtask has advanced past `processing` (report
    /// submitted, or the worker gave up and the ledger marked it failed).
    pub async fn release_claim(&self, role: Role, id: Uuid) {
        let queue = self.queue(role);
        queue.inner.write().await.processing.remove(&id);
    }

    /// Scan `role`'s processing set for claims older than `lease`, remove
    /// them, and re-enqueue their ids at the tail of pending (§4.1 Failure
    /// semantics, §9 "periodic-scan idiom applied to claims"). Returns the
    /// re-enqueued ids so the caller (the ledger) can bump `attempt` and
    /// transition status back to `pending`.
    pub async fn reap_expired(&self, role: Role, lease: Duration) -> Vec<Uuid> {
        let queue = self.queue(role);
        let mut inner = queue.inner.write().await;
        let now = Utc::now();
        let expired: Vec<Uuid> = inner
            .processing
            .iter()
            .filter(|(_, claim)| {
                now.signed_duration_since(claim.claimed_at)
                    .to_std()
                    .map(|age| age >= lease)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            inner.processing.remove(id);
            inner.pending.push_back(*id);
        }
        if !expired.is_empty() {
            queue.notify.notify_waiters();
        }
        expired
    }

    /// Number of subtasks currently pending for `role`.
    pub async fn pending_len(&self, role: Role) -> usize {
        self.queue(role).inner.read().await.pending.len()
    }

    /// Number of subtasks currently claimed (processing) for `role`.
    pub async fn processing_len(&self, role: Role) -> usize {
        self.queue(role).inner.read().await.processing.len()
    }

    /// Snapshot of pending ids in FIFO order, for `full_status_update`.
    pub async fn pending_snapshot(&self, role: Role) -> Vec<Uuid> {
        self.queue(role).inner.read().await.pending.iter().copied().collect()
    }

    /// Drop every pending and processing entry across all three roles
    /// (operator `/clear`, §6). The ledger is cleared separately by the
    /// caller — this only empties the queue-side bookkeeping.
    pub async fn clear(&self) {
        for role in Role::ALL {
            let queue = self.queue(role);
            let mut inner = queue.inner.write().await;
            inner.pending.clear();
            inner.processing.clear();
        }
    }
}

impl Default for QueueSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically reap expired claims across all three role queues. Intended
/// to run as a background task inside the Orchestrator (§4.1 "A background
/// reaper task... wakes on a short fixed interval").
pub async fn reap_forever(queues: &QueueSet, lease: Duration, scan_interval: Duration) -> ! {
    let mut ticker = tokio::time::interval(scan_interval);
    loop {
        ticker.tick().await;
        for role in Role::ALL {
            let reaped = queues.reap_expired(role, lease).await;
            for id in reaped {
                tracing::info!(%id, %role, "claim lease expired, re-enqueued");
            }
        }
    }
}
