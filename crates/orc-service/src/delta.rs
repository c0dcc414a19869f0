use std::collections::HashMap;

use chrono::{DateTime, Utc};
use orc_core::{AgentRunState, Role, StructureSnapshot, SubtaskStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queue task object as delivered over the push channel (§6): the subset
/// of a `Subtask` a worker or the UI needs, without the internal bookkeeping
/// fields (`attempt`, `parent`, timestamps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTask {
    /// The subtask's id.
    pub id: Uuid,
    /// Target filename.
    pub filename: String,
    /// The natural-language instruction.
    pub text: String,
    /// Current status.
    pub status: SubtaskStatus,
}

/// One point in the `processed_over_time` series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedCount {
    /// When this count was taken.
    pub at: DateTime<Utc>,
    /// Cumulative count of accepted subtasks at that time.
    pub count: u64,
}

/// Completion fraction, surfaced to the UI's progress bar.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProgressData {
    /// Total subtasks ever enqueued.
    pub total: usize,
    /// Subtasks currently `accepted`.
    pub accepted: usize,
    /// Subtasks currently `failed`.
    pub failed: usize,
}

/// Aggregate metrics delivered in a `full_status_update` (§6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AggregateMetrics {
    /// Cumulative accepted-count over time, for a sparkline.
    pub processed_over_time: Vec<TimestampedCount>,
    /// Count of subtasks per status, for the status pie chart.
    pub task_status_distribution: HashMap<String, u64>,
    /// Overall completion fraction.
    pub progress_data: ProgressData,
    /// Recent Repository Gateway commit messages, newest last.
    pub git_activity: Vec<String>,
}

/// A full replacement snapshot of everything the UI needs to render (§6
/// `full_status_update`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullStatus {
    /// Run-state of every supervised agent.
    pub agents: Vec<AgentRunState>,
    /// Each role's queue contents.
    pub queues: HashMap<Role, Vec<QueueTask>>,
    /// Every known subtask's current status, keyed by id.
    pub subtask_statuses: HashMap<Uuid, SubtaskStatus>,
    /// The authoritative structure snapshot.
    pub structure: StructureSnapshot,
    /// Aggregate metrics.
    pub metrics: AggregateMetrics,
}

/// Any subset of `FullStatus`'s fields (§6 `specific_update`); the recipient
/// merges non-`None` fields into its local view.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpecificFields {
    /// Updated run-states, if any changed.
    pub agents: Option<Vec<AgentRunState>>,
    /// Updated queue contents, if any role's queue changed.
    pub queues: Option<HashMap<Role, Vec<QueueTask>>>,
    /// Updated subtask statuses, if any changed.
    pub subtask_statuses: Option<HashMap<Uuid, SubtaskStatus>>,
    /// Updated structure snapshot, if it changed.
    pub structure: Option<StructureSnapshot>,
    /// Updated metrics, if they changed.
    pub metrics: Option<AggregateMetrics>,
}

/// One outbound push-channel message (§6). The `type` tag names the variant
/// exactly as the wire taxonomy requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Delta {
    /// Replaces the recipient's entire view. Subsumes any buffered deltas.
    #[serde(rename = "full_status_update")]
    FullStatusUpdate {
        /// The snapshot payload.
        status: FullStatus,
    },
    /// A coarse-grained status nudge (agent run-states changed).
    #[serde(rename = "status_update")]
    StatusUpdate {
        /// The updated run-states.
        agents: Vec<AgentRunState>,
    },
    /// One log line, raw bytes (ANSI escapes included) (§9).
    #[serde(rename = "log_update")]
    LogUpdate {
        /// The formatted line.
        line: String,
    },
    /// The structure snapshot changed.
    #[serde(rename = "structure_update")]
    StructureUpdate {
        /// The new snapshot.
        structure: StructureSnapshot,
    },
    /// One role's queue contents changed.
    #[serde(rename = "queue_update")]
    QueueUpdate {
        /// Which role's queue.
        role: Role,
        /// Current pending contents, FIFO order.
        pending: Vec<QueueTask>,
    },
    /// A partial merge update (§6 `specific_update`).
    #[serde(rename = "specific_update")]
    SpecificUpdate {
        /// The subset of fields that changed.
        fields: SpecificFields,
    },
    /// Keepalive with no payload.
    #[serde(rename = "ping")]
    Ping,
}

impl Delta {
    /// Whether this delta is a full-status snapshot (§4.1 Fan-out
    /// discipline: never dropped, subsumes buffered deltas).
    pub fn is_full_snapshot(&self) -> bool {
        matches!(self, Delta::FullStatusUpdate { .. })
    }
}

/// An inbound push-channel message (§6). Anything that doesn't parse into
/// one of these two known shapes is a Validation error (§7 kind 1, §9 "no
/// legacy untyped-message compatibility shim").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Request an immediate full-status snapshot.
    GetFullStatus,
    /// Request the chart-specific subset of aggregate metrics.
    GetChartUpdates,
}
