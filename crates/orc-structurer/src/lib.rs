//! The Structurer Agent (§4.5): proposes the file tree during Alignment,
//! then persists every worker report through the Repository Gateway and
//! re-publishes the tree. Unlike a Worker, its Provider call happens exactly
//! once per target (the initial proposal); the rest of its life is spent
//! reacting to reports, the same shape the Coordinator's own loop takes.

use std::sync::Arc;
use std::time::Duration;

use orc_core::{parse_tree, AgentModelConfig, Report, StructureSnapshot};
use orc_provider::{call_with_retry, Clock, ProviderAdapter, ProviderResponse};
use orc_repo::RepositoryGateway;
use orc_service::{AlignmentNegotiation, OrchestratorService};
use tokio_util::sync::CancellationToken;

/// Tuning the Structurer needs out of the process-wide configuration.
#[derive(Debug, Clone)]
pub struct StructurerConfig {
    /// Model assignment for the Structurer's own Provider calls.
    pub model: AgentModelConfig,
    /// Per-request deadline for the Structurer's proposal call.
    pub request_timeout: Duration,
}

const ALIGNMENT_TEMPLATE: &str = "\
You are the structurer agent. Propose a file tree for this target.

Target:
{target}

Respond with one repository-relative file path per line, inside a single code block.";

/// Run the Structurer's Alignment proposal followed by its persistence loop,
/// until `token` is cancelled. Intended to be wrapped in an
/// `orc_service::AgentTask` closure handed to the Supervisor (§4.4).
pub async fn run(
    service: Arc<OrchestratorService>,
    negotiation: Arc<AlignmentNegotiation>,
    provider: Arc<dyn ProviderAdapter>,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn RepositoryGateway>,
    config: StructurerConfig,
    target: String,
    token: CancellationToken,
) -> Result<(), String> {
    tokio::select! {
        _ = token.cancelled() => return Ok(()),
        result = propose_and_negotiate(provider.as_ref(), clock.as_ref(), &config, &negotiation, &target) => result?,
    };

    let mut feedback = service.structurer_feedback().await;
    loop {
        let report = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            report = feedback.recv() => report,
        };
        let Some(report) = report else {
            return Err("structurer feedback channel closed".to_string());
        };
        persist_report(&service, gateway.as_ref(), report).await;
    }
}

/// Propose a tree, then either yield to a revision request if the
/// Coordinator disagrees (§4.5 "Structurer may revise once") or learn the
/// settled tree directly if the Coordinator accepted the proposal verbatim.
/// The Coordinator only calls `request_revision()` on a mismatch
/// (`orc_coordinator::align`); on a match it goes straight to `settle()`
/// without ever requesting one, so this races the two waits instead of
/// awaiting a revision request unconditionally — otherwise the matching-
/// tree path (the common case) would block here forever and the
/// persistence loop below would never run. The settled tree isn't acted on
/// directly here — the Coordinator is the one that calls `update_structure`
/// and seeds executor subtasks from it — but waiting for settlement keeps
/// this call from returning before Alignment is actually over.
async fn propose_and_negotiate(
    provider: &dyn ProviderAdapter,
    clock: &dyn Clock,
    config: &StructurerConfig,
    negotiation: &AlignmentNegotiation,
    target: &str,
) -> Result<(), String> {
    let tree = propose_tree(provider, clock, config, target).await?;
    negotiation.propose(tree).await;

    tokio::select! {
        _ = negotiation.await_revision_request() => {
            let revised = propose_tree(provider, clock, config, target).await?;
            negotiation.propose(revised).await;
            negotiation.await_settlement().await;
        }
        _ = negotiation.await_settlement() => {}
    }
    Ok(())
}

async fn propose_tree(
    provider: &dyn ProviderAdapter,
    clock: &dyn Clock,
    config: &StructurerConfig,
    target: &str,
) -> Result<StructureSnapshot, String> {
    let prompt = ALIGNMENT_TEMPLATE.replace("{target}", target);
    match call_with_retry(
        provider,
        clock,
        &prompt,
        &config.model.model,
        config.model.temperature,
        config.model.max_tokens,
        config.request_timeout,
        &orc_core::RetryConfig { max_attempts: 1, ..orc_core::RetryConfig::default() },
    )
    .await
    {
        Ok(ProviderResponse::Text(text)) => Ok(parse_tree(&text)),
        Ok(ProviderResponse::Binary) => Ok(StructureSnapshot::empty()),
        Err(e) => Err(format!("structurer alignment call failed: {e}")),
    }
}

/// Write one worker's report through the Repository Gateway, commit it, and
/// re-publish the resulting tree (§4.5 Persistence loop). Gateway failures
/// are logged rather than propagated — a single bad write shouldn't take
/// down the Structurer's loop (§7 kind 2, handled locally at the agent
/// boundary the same way Worker Provider failures are).
async fn persist_report(service: &OrchestratorService, gateway: &dyn RepositoryGateway, report: Report) {
    let message = format!("{}: {} ({})", report.role, report.filename, report.subtask_id);

    if let Err(e) = gateway.write(&report.filename, report.payload.into_bytes()).await {
        tracing::warn!(filename = %report.filename, error = %e, "structurer: gateway write failed");
        return;
    }
    if let Err(e) = gateway.commit(message.clone()).await {
        tracing::warn!(filename = %report.filename, error = %e, "structurer: gateway commit failed");
        return;
    }
    service.record_commit(message).await;

    match gateway.tree().await {
        Ok(tree) => service.update_structure(tree).await,
        Err(e) => tracing::warn!(error = %e, "structurer: failed to enumerate tree after commit"),
    }
}
