//! Shared state handed to every axum handler: the service itself, the
//! Repository Gateway for `/file_content` and `/clear_repo`, and the set of
//! `AgentTask`s the Supervisor can start, keyed by the `ai1`/`ai2`/`ai3`
//! groups the control routes name (§6).

use std::collections::HashMap;
use std::sync::Arc;

use orc_core::AgentId;
use orc_repo::RepositoryGateway;
use orc_service::{AgentTask, OrchestratorService};

/// The three control groups the HTTP surface exposes. `Ai2` fans out to all
/// three worker roles at once — the spec names one knob for "the workers"
/// rather than three, so `/start_ai2` and `/stop_ai2` start or stop all of
/// them together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentGroup {
    /// The Coordinator.
    Ai1,
    /// Executor, Tester and Documenter together.
    Ai2,
    /// The Structurer.
    Ai3,
}

impl AgentGroup {
    /// Parse a route suffix (`"ai1"`, `"ai2"`, `"ai3"`) into a group.
    pub fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "ai1" => Some(Self::Ai1),
            "ai2" => Some(Self::Ai2),
            "ai3" => Some(Self::Ai3),
            _ => None,
        }
    }

    /// The agents this group controls.
    pub fn agents(self) -> &'static [AgentId] {
        match self {
            Self::Ai1 => &[AgentId::Coordinator],
            Self::Ai2 => &[AgentId::Executor, AgentId::Tester, AgentId::Documenter],
            Self::Ai3 => &[AgentId::Structurer],
        }
    }
}

/// State shared across every gateway handler, cloned cheaply (it's all
/// `Arc`s) into each request.
#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<OrchestratorService>,
    pub repo: Arc<dyn RepositoryGateway>,
    pub tasks: Arc<HashMap<AgentId, AgentTask>>,
}

impl GatewayState {
    pub fn new(
        service: Arc<OrchestratorService>,
        repo: Arc<dyn RepositoryGateway>,
        tasks: HashMap<AgentId, AgentTask>,
    ) -> Self {
        Self { service, repo, tasks: Arc::new(tasks) }
    }
}
