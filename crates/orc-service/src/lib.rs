//! The Orchestrator Service control plane (§3, §4.1): task ledger, per-role
//! queues, structure snapshot, subscriber fan-out, agent supervision, and
//! configuration — the one component every agent talks to and which talks
//! to none of them directly (§3 Ownership, §5).

pub mod alignment;
pub mod delta;
pub mod ledger;
pub mod service;
pub mod subscriber;
pub mod supervisor;

pub use alignment::AlignmentNegotiation;
pub use delta::{
    AggregateMetrics, Delta, FullStatus, InboundMessage, ProgressData, QueueTask, SpecificFields,
    TimestampedCount,
};
pub use ledger::Ledger;
pub use service::OrchestratorService;
pub use subscriber::SubscriberBuffer;
pub use supervisor::{AgentTask, Supervisor, SupervisorConfig};
