use thiserror::Error;

/// Errors raised while parsing or validating core data-model values
/// (role strings, status strings, malformed structure snapshots).
#[derive(Debug, Error)]
pub enum CoreError {
    /// A role string didn't match `executor`/`tester`/`documenter`.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// A subtask status string didn't match one of the five defined values.
    #[error("unknown subtask status: {0}")]
    UnknownStatus(String),

    /// Configuration failed validation at load or at `update_config`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Validation-kind errors surfaced by the Orchestrator's public operations
/// (§4.1, §7 kind 1 — Validation). These map to 4xx at the HTTP boundary and
/// are never retried.
#[derive(Debug, Error)]
pub enum ControlError {
    /// `submit_report`/`mark_accepted`/`mark_failed` referenced an id that
    /// was never enqueued.
    #[error("unknown subtask: {0}")]
    UnknownSubtask(uuid::Uuid),

    /// `submit_report` named a role that doesn't match the subtask's role.
    #[error("wrong role for subtask {subtask}: expected {expected}, got {actual}")]
    WrongRole {
        /// The subtask whose role didn't match.
        subtask: uuid::Uuid,
        /// The role recorded on the subtask.
        expected: crate::role::Role,
        /// The role the caller claimed.
        actual: crate::role::Role,
    },

    /// `submit_report` targeted a subtask that isn't currently `processing`.
    #[error("subtask {0} is not claimed")]
    NotClaimed(uuid::Uuid),

    /// `enqueue_subtask` was given an id that's already present.
    #[error("duplicate subtask id: {0}")]
    DuplicateId(uuid::Uuid),

    /// An operation named an agent id that doesn't exist.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// A request failed shape or semantic validation (e.g. an untyped
    /// inbound push-channel message, or a `parallel_roles: true` config).
    #[error("validation failed: {0}")]
    Validation(String),
}

/// Errors surfaced at the agent boundary after exhausting local recovery
/// (§7 kind 2 — Transient external, once retries are exhausted).
#[derive(Debug, Error)]
pub enum AgentError {
    /// The Provider Adapter failed after exhausting the configured retry
    /// attempts.
    #[error("provider call failed after retries: {0}")]
    ProviderExhausted(String),

    /// The Provider returned a payload that could not be decoded under the
    /// agreed charset (§4.3 Binary payload handling).
    #[error("provider returned a binary payload")]
    BinaryPayload,

    /// The Repository Gateway failed an I/O operation.
    #[error("repository gateway error: {0}")]
    Gateway(String),

    /// The Orchestrator rejected an operation this agent attempted.
    #[error("orchestrator rejected operation: {0}")]
    Control(#[from] ControlError),
}
