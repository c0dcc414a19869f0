use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::role::AgentId;

/// Desired-vs-actual lifecycle status the Supervisor tracks per agent (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Never started, or cleanly stopped.
    Stopped,
    /// Running normally.
    Running,
    /// Respawn budget exhausted; awaiting operator intervention (§7 kind 5).
    Failed,
}

/// Per-agent run-state record (§3): running flag, last-heartbeat, restart
/// count, last-error. One of these exists for each of
/// `{coordinator, executor, tester, documenter, structurer}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunState {
    /// Which agent this record describes.
    pub agent: AgentId,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Most recent heartbeat, if the agent has ever run.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Restarts in the current backoff window (§4.4).
    pub restart_count: u32,
    /// Most recent error message, if any.
    pub last_error: Option<String>,
}

impl AgentRunState {
    /// A freshly-created run-state: stopped, no heartbeat, no restarts.
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            status: AgentStatus::Stopped,
            last_heartbeat: None,
            restart_count: 0,
            last_error: None,
        }
    }

    /// Record a heartbeat, implicitly marking the agent running.
    pub fn heartbeat(&mut self) {
        self.status = AgentStatus::Running;
        self.last_heartbeat = Some(Utc::now());
    }

    /// Mark the agent stopped cleanly; restart count resets.
    pub fn mark_stopped(&mut self) {
        self.status = AgentStatus::Stopped;
        self.restart_count = 0;
    }

    /// Mark the agent failed (respawn budget exhausted), recording the reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = AgentStatus::Failed;
        self.last_error = Some(reason.into());
    }

    /// Record an abnormal exit that will be followed by a respawn attempt.
    pub fn record_restart(&mut self, reason: impl Into<String>) {
        self.restart_count += 1;
        self.last_error = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_state_starts_stopped() {
        let state = AgentRunState::new(AgentId::Coordinator);
        assert_eq!(state.status, AgentStatus::Stopped);
        assert_eq!(state.restart_count, 0);
        assert!(state.last_heartbeat.is_none());
    }

    #[test]
    fn heartbeat_marks_running_and_stamps_time() {
        let mut state = AgentRunState::new(AgentId::Executor);
        state.heartbeat();
        assert_eq!(state.status, AgentStatus::Running);
        assert!(state.last_heartbeat.is_some());
    }

    #[test]
    fn record_restart_increments_count_and_keeps_reason() {
        let mut state = AgentRunState::new(AgentId::Tester);
        state.record_restart("provider timeout");
        state.record_restart("provider timeout");
        assert_eq!(state.restart_count, 2);
        assert_eq!(state.last_error.as_deref(), Some("provider timeout"));
    }

    #[test]
    fn mark_stopped_resets_restart_count() {
        let mut state = AgentRunState::new(AgentId::Documenter);
        state.record_restart("x");
        state.mark_stopped();
        assert_eq!(state.status, AgentStatus::Stopped);
        assert_eq!(state.restart_count, 0);
    }
}
