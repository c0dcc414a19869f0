use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::role::Role;

/// A subtask's position in its monotonic state machine (§3, §4.1).
///
/// Transitions are monotonic except `Processing -> Pending`, which is
/// permitted on worker crash (lease expiry) or Coordinator rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Waiting in its role's queue.
    Pending,
    /// Claimed by a worker; a lease is running.
    Processing,
    /// A report has landed; awaiting Coordinator validation.
    CodeReceived,
    /// Validated by the Coordinator. Terminal.
    Accepted,
    /// Retries exhausted or Coordinator rejected permanently. Terminal.
    Failed,
}

/// The atomic unit of work (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    /// Opaque unique id, stable across retries.
    pub id: Uuid,
    /// Which role worker this subtask is destined for.
    pub role: Role,
    /// Path relative to the repository root.
    pub filename: String,
    /// Natural-language instruction to the worker.
    pub text: String,
    /// Current status.
    pub status: SubtaskStatus,
    /// Number of claim attempts made so far (incremented on every
    /// re-enqueue, whether from lease expiry or Coordinator rejection).
    pub attempt: u32,
    /// Reason recorded on the most recent failure or rejection, if any.
    pub last_error: Option<String>,
    /// Which Coordinator decision produced this subtask, if any.
    pub parent: Option<Uuid>,
    /// When this subtask was created.
    pub created_at: DateTime<Utc>,
}

impl Subtask {
    /// Construct a new subtask in `Pending` status with attempt count zero.
    pub fn new(role: Role, filename: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            filename: filename.into(),
            text: text.into(),
            status: SubtaskStatus::Pending,
            attempt: 0,
            last_error: None,
            parent: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a parent Coordinator-decision id.
    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Attach an explicit, caller-chosen id (Coordinator's optional stable id, §4.1).
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }
}

/// A worker's answer to one subtask (§3). The only vehicle that advances a
/// subtask out of `Processing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// The subtask this report answers.
    pub subtask_id: Uuid,
    /// The file the payload is destined for.
    pub filename: String,
    /// The worker's output text.
    pub payload: String,
    /// Which role produced this report.
    pub role: Role,
    /// How long the Provider call took.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_subtask_starts_pending_with_zero_attempts() {
        let s = Subtask::new(Role::Executor, "add.py", "write add(a, b)");
        assert_eq!(s.status, SubtaskStatus::Pending);
        assert_eq!(s.attempt, 0);
        assert!(s.parent.is_none());
    }

    #[test]
    fn with_parent_and_with_id_set_the_expected_fields() {
        let parent = Uuid::new_v4();
        let id = Uuid::new_v4();
        let s = Subtask::new(Role::Tester, "add.py", "test add")
            .with_parent(parent)
            .with_id(id);
        assert_eq!(s.parent, Some(parent));
        assert_eq!(s.id, id);
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&SubtaskStatus::CodeReceived).unwrap();
        assert_eq!(json, "\"code_received\"");
    }
}
