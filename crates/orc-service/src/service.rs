use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orc_core::{
    AgentId, AgentRunState, ControlError, LogTail, OrchestratorConfig, Report, Role, StructureSnapshot,
    Subtask, SubtaskStatus,
};
use orc_queue::QueueSet;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::delta::{AggregateMetrics, Delta, FullStatus, ProgressData, QueueTask, SpecificFields, TimestampedCount};
use crate::ledger::Ledger;
use crate::subscriber::SubscriberBuffer;
use crate::supervisor::{AgentTask, Supervisor, SupervisorConfig};

const GIT_ACTIVITY_CAP: usize = 200;
const PROCESSED_OVER_TIME_CAP: usize = 500;

/// The Orchestrator Service: the single owner of the ledger, per-role
/// queues, structure snapshot, subscriber registry, and agent run-states
/// (§3 Ownership, §4.1). Every public method here is one of the operations
/// named in §4.1's public contract; nothing outside this type mutates that
/// state directly.
pub struct OrchestratorService {
    queues: QueueSet,
    ledger: RwLock<Ledger>,
    subscribers: RwLock<HashMap<Uuid, Arc<SubscriberBuffer>>>,
    structure: RwLock<StructureSnapshot>,
    run_states: Arc<RwLock<HashMap<AgentId, AgentRunState>>>,
    config: RwLock<OrchestratorConfig>,
    supervisor: Supervisor,
    git_activity: RwLock<Vec<String>>,
    processed_over_time: RwLock<Vec<TimestampedCount>>,
    coordinator_feedback: RwLock<Option<mpsc::UnboundedSender<Report>>>,
    structurer_feedback: RwLock<Option<mpsc::UnboundedSender<Report>>>,
    log_tail: RwLock<LogTail>,
}

impl OrchestratorService {
    /// A fresh service over the given starting configuration, with every
    /// agent initialized to `Stopped` and no subscribers, subtasks, or
    /// structure yet.
    pub fn new(config: OrchestratorConfig) -> Self {
        let mut run_states = HashMap::new();
        for agent in AgentId::ALL {
            run_states.insert(agent, AgentRunState::new(agent));
        }
        let log_tail = LogTail::new(config.log_tail_lines);
        Self {
            queues: QueueSet::new(),
            ledger: RwLock::new(Ledger::new()),
            subscribers: RwLock::new(HashMap::new()),
            structure: RwLock::new(StructureSnapshot::empty()),
            run_states: Arc::new(RwLock::new(run_states)),
            config: RwLock::new(config),
            supervisor: Supervisor::new(SupervisorConfig::default()),
            git_activity: RwLock::new(Vec::new()),
            processed_over_time: RwLock::new(Vec::new()),
            coordinator_feedback: RwLock::new(None),
            structurer_feedback: RwLock::new(None),
            log_tail: RwLock::new(log_tail),
        }
    }

    /// Attach the Coordinator's feedback channel (§4.1, §4.2): every
    /// subsequent `submit_report` also forwards the report here, so the
    /// Coordinator's Assignment phase can react to it without polling the
    /// ledger. Only one Coordinator runs at a time, so a later call simply
    /// replaces the previous sender — its receiver is dropped and that
    /// Coordinator instance stops hearing new reports.
    pub async fn coordinator_feedback(&self) -> mpsc::UnboundedReceiver<Report> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.coordinator_feedback.write().await = Some(tx);
        rx
    }

    /// Attach the Structurer's feedback channel (§4.5): every subsequent
    /// `submit_report` also forwards the report here, so the Structurer
    /// can persist accepted output to the repository as soon as it's
    /// received, in parallel with the Coordinator's own acceptance
    /// bookkeeping. Mirrors `coordinator_feedback` exactly, including the
    /// replace-on-resubscribe behavior.
    pub async fn structurer_feedback(&self) -> mpsc::UnboundedReceiver<Report> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.structurer_feedback.write().await = Some(tx);
        rx
    }

    /// The current configuration (whole-config read half of §6 `/update_config`).
    pub async fn config(&self) -> OrchestratorConfig {
        self.config.read().await.clone()
    }

    // ---- subtask lifecycle (§4.1) -----------------------------------

    /// Enqueue a subtask from the Coordinator. Assigns an id if `id` is
    /// absent; rejects a caller-supplied id already present.
    pub async fn enqueue_subtask(
        &self,
        role: Role,
        filename: impl Into<String>,
        text: impl Into<String>,
        parent: Option<Uuid>,
        id: Option<Uuid>,
    ) -> Result<Uuid, ControlError> {
        let mut subtask = Subtask::new(role, filename, text);
        if let Some(parent) = parent {
            subtask = subtask.with_parent(parent);
        }
        if let Some(id) = id {
            subtask = subtask.with_id(id);
        }
        let id = subtask.id;

        {
            let mut ledger = self.ledger.write().await;
            if ledger.contains(id) {
                return Err(ControlError::DuplicateId(id));
            }
            ledger.insert(subtask);
        }
        self.queues.enqueue(role, id).await;
        self.broadcast_queue_update(role).await;
        Ok(id)
    }

    /// Claim the head of `role`'s queue for `worker`, transitioning it to
    /// `processing`. Suspends up to `poll_timeout` if the queue is empty,
    /// then returns `None` for the caller to re-ask (§4.1).
    pub async fn claim_next(
        &self,
        role: Role,
        worker: impl Into<String>,
        poll_timeout: Duration,
    ) -> Option<Uuid> {
        let id = self.queues.claim_next(role, worker, poll_timeout).await?;
        {
            let mut ledger = self.ledger.write().await;
            if let Some(subtask) = ledger.get_mut(id) {
                subtask.status = SubtaskStatus::Processing;
            }
        }
        self.broadcast_queue_update(role).await;
        Some(id)
    }

    /// Renew a worker's claim lease on heartbeat (§4.3).
    pub async fn heartbeat(&self, role: Role, id: Uuid) {
        self.queues.renew_claim(role, id).await;
    }

    /// Look up a subtask's current record (a Worker needs this after
    /// claiming to read `filename`/`text`/`parent`; `claim_next` itself only
    /// hands back the id, mirroring the queue's own id-only contract).
    pub async fn get_subtask(&self, id: Uuid) -> Option<Subtask> {
        self.ledger.read().await.get(id).cloned()
    }

    /// The most recent report recorded against a subtask, if any (a Tester
    /// or Documenter worker uses this to fetch the Executor's produced
    /// content for the same file via the subtask's `parent` link, §4.3).
    pub async fn latest_report(&self, subtask_id: Uuid) -> Option<Report> {
        self.ledger.read().await.latest_report(subtask_id).cloned()
    }

    /// Record a worker's report (§4.1). Validates the subtask exists, is
    /// `processing`, and the role matches before accepting, then forwards a
    /// copy to the Coordinator's feedback channel, if one is attached.
    pub async fn submit_report(
        &self,
        role: Role,
        subtask_id: Uuid,
        filename: impl Into<String>,
        payload: impl Into<String>,
        duration_ms: u64,
    ) -> Result<(), ControlError> {
        let filename = filename.into();
        let payload = payload.into();
        {
            let mut ledger = self.ledger.write().await;
            {
                let subtask = ledger
                    .get_mut(subtask_id)
                    .ok_or(ControlError::UnknownSubtask(subtask_id))?;
                if subtask.role != role {
                    return Err(ControlError::WrongRole {
                        subtask: subtask_id,
                        expected: subtask.role,
                        actual: role,
                    });
                }
                if subtask.status != SubtaskStatus::Processing {
                    return Err(ControlError::NotClaimed(subtask_id));
                }
                subtask.status = SubtaskStatus::CodeReceived;
            }
            let report = Report {
                subtask_id,
                filename,
                payload,
                role,
                duration_ms,
            };
            ledger.record_report(report.clone());
            if let Some(tx) = self.coordinator_feedback.read().await.as_ref() {
                let _ = tx.send(report.clone());
            }
            if let Some(tx) = self.structurer_feedback.read().await.as_ref() {
                let _ = tx.send(report);
            }
        }
        self.queues.release_claim(role, subtask_id).await;
        self.broadcast_subtask_status(subtask_id, SubtaskStatus::CodeReceived).await;
        Ok(())
    }

    /// Re-enqueue a subtask the Coordinator rejected, with refined text
    /// (§4.1 state machine: `code_received --reject--> pending`, §8
    /// "re-enqued with refined text"). Bumps `attempt` the same way lease
    /// expiry does, since both are a return to `pending` after an attempt
    /// was spent.
    pub async fn requeue_with_refined_text(
        &self,
        id: Uuid,
        refined_text: impl Into<String>,
    ) -> Result<(), ControlError> {
        let role = {
            let mut ledger = self.ledger.write().await;
            let subtask = ledger.get_mut(id).ok_or(ControlError::UnknownSubtask(id))?;
            subtask.text = refined_text.into();
            subtask.status = SubtaskStatus::Pending;
            subtask.attempt += 1;
            subtask.role
        };
        self.queues.enqueue(role, id).await;
        self.broadcast_queue_update(role).await;
        Ok(())
    }

    /// Mark a subtask accepted (Coordinator validation passed). Idempotent:
    /// a second call on an already-`accepted` subtask is a no-op (§8).
    pub async fn mark_accepted(&self, id: Uuid) -> Result<(), ControlError> {
        let newly_accepted = {
            let mut ledger = self.ledger.write().await;
            let subtask = ledger.get_mut(id).ok_or(ControlError::UnknownSubtask(id))?;
            if subtask.status == SubtaskStatus::Accepted {
                false
            } else {
                subtask.status = SubtaskStatus::Accepted;
                true
            }
        };
        if newly_accepted {
            self.broadcast_subtask_status(id, SubtaskStatus::Accepted).await;
            self.record_accepted_tick().await;
        }
        Ok(())
    }

    /// Mark a subtask failed, with a reason (retries exhausted, or
    /// Coordinator rejected permanently).
    pub async fn mark_failed(&self, id: Uuid, reason: impl Into<String>) -> Result<(), ControlError> {
        let reason = reason.into();
        let role = {
            let mut ledger = self.ledger.write().await;
            let subtask = ledger.get_mut(id).ok_or(ControlError::UnknownSubtask(id))?;
            subtask.status = SubtaskStatus::Failed;
            subtask.last_error = Some(reason);
            subtask.role
        };
        self.queues.release_claim(role, id).await;
        self.broadcast_subtask_status(id, SubtaskStatus::Failed).await;
        Ok(())
    }

    /// Replace the structure snapshot (Structurer, §4.1) and broadcast the
    /// delta.
    pub async fn update_structure(&self, snapshot: StructureSnapshot) {
        *self.structure.write().await = snapshot.clone();
        self.broadcast(Delta::StructureUpdate { structure: snapshot }).await;
    }

    /// The current structure snapshot.
    pub async fn structure(&self) -> StructureSnapshot {
        self.structure.read().await.clone()
    }

    /// Record a Repository Gateway commit message for the `git_activity`
    /// metric (§6 aggregate metrics).
    pub async fn record_commit(&self, message: impl Into<String>) {
        let mut activity = self.git_activity.write().await;
        activity.push(message.into());
        if activity.len() > GIT_ACTIVITY_CAP {
            let overflow = activity.len() - GIT_ACTIVITY_CAP;
            activity.drain(0..overflow);
        }
    }

    // ---- pipeline / agent control (§4.4, §6) -------------------------

    /// Start one agent under supervision.
    pub async fn start_agent(&self, agent: AgentId, task: AgentTask) {
        self.supervisor.start(agent, self.run_states.clone(), task).await;
    }

    /// Stop one agent, waiting up to its grace period before force-abort.
    pub async fn stop_agent(&self, agent: AgentId) {
        self.supervisor.stop(agent, &self.run_states).await;
    }

    /// Start every agent named in `tasks` (pipeline `/start_all`, or
    /// `ai2` covering all three worker roles).
    pub async fn start_all(&self, tasks: HashMap<AgentId, AgentTask>) {
        for (agent, task) in tasks {
            self.start_agent(agent, task).await;
        }
    }

    /// Stop every supervised agent (`/stop_all`).
    pub async fn stop_all(&self) {
        for agent in AgentId::ALL {
            self.stop_agent(agent).await;
        }
    }

    /// Whether `agent` is currently running.
    pub async fn is_agent_running(&self, agent: AgentId) -> bool {
        self.supervisor.is_running(agent).await
    }

    /// `/clear`: empty the ledger and queues, reset the structure snapshot,
    /// and broadcast a fresh full snapshot. Does not touch the Repository
    /// Gateway's working tree — that is `/clear_repo`, handled one layer up.
    pub async fn clear(&self) {
        self.ledger.write().await.clear();
        self.queues.clear().await;
        *self.structure.write().await = StructureSnapshot::empty();
        self.git_activity.write().await.clear();
        self.processed_over_time.write().await.clear();
        {
            let capacity = self.config.read().await.log_tail_lines;
            *self.log_tail.write().await = LogTail::new(capacity);
        }
        let snapshot = self.full_status().await;
        self.broadcast(Delta::FullStatusUpdate { status: snapshot }).await;
    }

    /// Whole-config replace (`/update_config`): validate, persist, then
    /// swap in the new configuration.
    pub async fn update_config(&self, new_config: OrchestratorConfig) -> Result<(), ControlError> {
        new_config.validate().map_err(|e| ControlError::Validation(e.to_string()))?;
        new_config
            .persist()
            .map_err(|e| ControlError::Validation(e.to_string()))?;
        *self.config.write().await = new_config;
        Ok(())
    }

    /// Single-key update (`/update_config_item`): apply `update` to a copy
    /// of the current config, validate and persist it, then swap it in only
    /// if both succeed (never leaves a partially-applied config in place).
    pub async fn update_config_item<F>(&self, update: F) -> Result<(), ControlError>
    where
        F: FnOnce(&mut OrchestratorConfig),
    {
        let mut candidate = self.config.read().await.clone();
        update(&mut candidate);
        candidate.validate().map_err(|e| ControlError::Validation(e.to_string()))?;
        candidate
            .persist()
            .map_err(|e| ControlError::Validation(e.to_string()))?;
        *self.config.write().await = candidate;
        Ok(())
    }

    // ---- subscribers (§4.1 Subscribe, §8 fan-out) ---------------------

    /// Attach a new subscriber: it immediately receives a full-status
    /// snapshot, then deltas as they're emitted (§4.1).
    pub async fn subscribe(&self) -> (Uuid, Arc<SubscriberBuffer>) {
        let id = Uuid::new_v4();
        let capacity = self.config.read().await.subscriber_buffer;
        let buffer = Arc::new(SubscriberBuffer::new(id, capacity));
        self.subscribers.write().await.insert(id, buffer.clone());

        let snapshot = self.full_status().await;
        let delta = Delta::FullStatusUpdate { status: snapshot };
        let fallback = delta.clone();
        buffer.push(delta, || fallback.clone());

        for record in self.log_tail.read().await.snapshot() {
            let delta = Delta::LogUpdate { line: record.line };
            let fallback = delta.clone();
            buffer.push(delta, || fallback);
        }
        (id, buffer)
    }

    /// Detach a subscriber.
    pub async fn unsubscribe(&self, id: Uuid) {
        self.subscribers.write().await.remove(&id);
    }

    /// Append one log line to the in-memory tail (§3, replayed to new
    /// subscribers by `subscribe`) and fan it out to every subscriber
    /// already attached as a `log_update` delta. Fed by the process's own
    /// `tracing` layer, one call per formatted line, raw ANSI escapes
    /// included (§9 "ANSI-colored log passthrough").
    pub async fn publish_log_line(&self, line: impl Into<String>) {
        let line = line.into();
        self.log_tail.write().await.push(line.clone());
        self.broadcast(Delta::LogUpdate { line }).await;
    }

    // ---- snapshot / metrics construction -------------------------------

    /// Build a full-status snapshot from current state (§6).
    pub async fn full_status(&self) -> FullStatus {
        let agents = self.run_states.read().await.values().cloned().collect();

        let ledger = self.ledger.read().await;
        let mut queues = HashMap::new();
        for role in Role::ALL {
            let pending_ids = self.queues.pending_snapshot(role).await;
            let tasks = pending_ids
                .iter()
                .filter_map(|id| ledger.get(*id))
                .map(to_queue_task)
                .collect();
            queues.insert(role, tasks);
        }
        let subtask_statuses = ledger.all().map(|s| (s.id, s.status)).collect();

        let structure = self.structure.read().await.clone();
        let metrics = self.compute_metrics(&ledger).await;

        FullStatus {
            agents,
            queues,
            subtask_statuses,
            structure,
            metrics,
        }
    }

    async fn compute_metrics(&self, ledger: &Ledger) -> AggregateMetrics {
        let mut task_status_distribution = HashMap::new();
        for status in [
            SubtaskStatus::Pending,
            SubtaskStatus::Processing,
            SubtaskStatus::CodeReceived,
            SubtaskStatus::Accepted,
            SubtaskStatus::Failed,
        ] {
            task_status_distribution.insert(status_label(status).to_string(), ledger.count_by_status(status) as u64);
        }
        let progress_data = ProgressData {
            total: ledger.len(),
            accepted: ledger.count_by_status(SubtaskStatus::Accepted),
            failed: ledger.count_by_status(SubtaskStatus::Failed),
        };
        AggregateMetrics {
            processed_over_time: self.processed_over_time.read().await.clone(),
            task_status_distribution,
            progress_data,
            git_activity: self.git_activity.read().await.clone(),
        }
    }

    async fn record_accepted_tick(&self) {
        let count = self.ledger.read().await.count_by_status(SubtaskStatus::Accepted) as u64;
        let mut series = self.processed_over_time.write().await;
        series.push(TimestampedCount { at: Utc::now(), count });
        if series.len() > PROCESSED_OVER_TIME_CAP {
            let overflow = series.len() - PROCESSED_OVER_TIME_CAP;
            series.drain(0..overflow);
        }
    }

    async fn broadcast_queue_update(&self, role: Role) {
        let ledger = self.ledger.read().await;
        let pending_ids = self.queues.pending_snapshot(role).await;
        let pending = pending_ids
            .iter()
            .filter_map(|id| ledger.get(*id))
            .map(to_queue_task)
            .collect();
        drop(ledger);
        self.broadcast(Delta::QueueUpdate { role, pending }).await;
    }

    async fn broadcast_subtask_status(&self, id: Uuid, status: SubtaskStatus) {
        let mut subtask_statuses = HashMap::new();
        subtask_statuses.insert(id, status);
        self.broadcast(Delta::SpecificUpdate {
            fields: SpecificFields {
                subtask_statuses: Some(subtask_statuses),
                ..Default::default()
            },
        })
        .await;
    }

    /// Fan out `delta` to every subscriber's outbound buffer (§4.1, §5). A
    /// full snapshot is computed eagerly so any subscriber whose buffer
    /// happens to be full can coalesce to it without the push itself ever
    /// becoming async (`SubscriberBuffer::push` must stay synchronous so it
    /// never blocks the caller).
    async fn broadcast(&self, delta: Delta) {
        let fallback = if delta.is_full_snapshot() {
            delta.clone()
        } else {
            Delta::FullStatusUpdate {
                status: self.full_status().await,
            }
        };
        let subscribers = self.subscribers.read().await;
        for buffer in subscribers.values() {
            let delta = delta.clone();
            let fallback = fallback.clone();
            buffer.push(delta, || fallback);
        }
    }

    // ---- lease reaping (§4.1 background reaper, §5) --------------------

    /// Background loop: periodically reap expired claims on every role
    /// queue, returning their subtasks to `pending` with `attempt += 1`
    /// (§4.1). Runs until the process exits; intended to be spawned once at
    /// startup via `tokio::spawn(service.clone().reap_forever(...))`.
    pub async fn reap_forever(self: Arc<Self>, lease: Duration, scan_interval: Duration) -> ! {
        let mut ticker = tokio::time::interval(scan_interval);
        loop {
            ticker.tick().await;
            for role in Role::ALL {
                let reaped = self.queues.reap_expired(role, lease).await;
                if reaped.is_empty() {
                    continue;
                }
                {
                    let mut ledger = self.ledger.write().await;
                    for id in &reaped {
                        if let Some(subtask) = ledger.get_mut(*id) {
                            subtask.status = SubtaskStatus::Pending;
                            subtask.attempt += 1;
                        }
                    }
                }
                for id in &reaped {
                    tracing::info!(%id, %role, "claim lease expired, re-enqueued");
                }
                self.broadcast_queue_update(role).await;
            }
        }
    }
}

fn to_queue_task(subtask: &Subtask) -> QueueTask {
    QueueTask {
        id: subtask.id,
        filename: subtask.filename.clone(),
        text: subtask.text.clone(),
        status: subtask.status,
    }
}

fn status_label(status: SubtaskStatus) -> &'static str {
    match status {
        SubtaskStatus::Pending => "pending",
        SubtaskStatus::Processing => "processing",
        SubtaskStatus::CodeReceived => "code_received",
        SubtaskStatus::Accepted => "accepted",
        SubtaskStatus::Failed => "failed",
    }
}
