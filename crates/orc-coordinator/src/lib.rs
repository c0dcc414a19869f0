//! The Coordinator Agent's loop (§4.2): Alignment, Assignment, Completion
//! detection, run as one agent task under the Supervisor alongside the
//! Workers and the Structurer. Unlike a Worker, the Coordinator calls its
//! own Provider exactly once per target — during Alignment — and spends the
//! rest of its life reacting to reports rather than polling a queue itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orc_core::{
    parse_tree, AgentModelConfig, ConfidenceConfig, OrchestratorConfig, Report, RetryConfig, Role,
    StructureNode, StructureSnapshot,
};
use orc_provider::{call_with_retry, Clock, ProviderAdapter, ProviderResponse};
use orc_service::{AlignmentNegotiation, OrchestratorService};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tuning the Coordinator needs out of the process-wide configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Model assignment for the Coordinator's own Provider calls.
    pub model: AgentModelConfig,
    /// Uniform-random delay bounds applied before each Provider call (§4.2
    /// "Rate-limiting of its own Provider calls").
    pub rate_limit: RetryConfig,
    /// Per-role acceptance thresholds (§4.2 "Metrics-based acceptance").
    pub confidence: HashMap<Role, ConfidenceConfig>,
    /// Per-request deadline for the Coordinator's own Provider calls.
    pub request_timeout: Duration,
    /// Ceiling on Coordinator-driven refinement attempts before a subtask is
    /// given up on as `failed` (§8 scenario 4: "after 3 refinements still
    /// failing"). The spec names no distinct config key for this — it
    /// reuses the executor role's `RetryConfig::max_attempts`, the same
    /// "attempt ceiling" concept the Worker already uses for its own
    /// Provider retries, rather than inventing a parallel knob.
    pub max_refinement_attempts: u32,
}

impl CoordinatorConfig {
    /// Pull the Coordinator's settings out of the process config.
    pub fn from_orchestrator_config(config: &OrchestratorConfig) -> Self {
        let max_refinement_attempts = config
            .worker_retry
            .get(&Role::Executor)
            .cloned()
            .unwrap_or_default()
            .max_attempts;
        Self {
            model: config.coordinator_model.clone(),
            rate_limit: config.coordinator_rate_limit.clone(),
            confidence: config.confidence.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            max_refinement_attempts,
        }
    }
}

const ALIGNMENT_TEMPLATE: &str = "\
You are the coordinator agent. Propose a file tree for this target.

Target:
{target}

Respond with one repository-relative file path per line, inside a single code block.";

/// Parse a worker's reported metrics out of a `key=value` per-line payload
/// (the Tester/Documenter report format named in §4.3's prompt templates).
/// Lines that don't parse as `name=number` are skipped rather than
/// rejecting the whole report — a chatty Provider response around the
/// metrics line shouldn't sink an otherwise-usable report.
pub fn parse_metrics(text: &str) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        if let Ok(value) = value.trim().parse::<f64>() {
            metrics.insert(name.trim().to_string(), value);
        }
    }
    metrics
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn tester_filename(executor_filename: &str) -> String {
    format!("tests/test_{}", basename(executor_filename))
}

fn documenter_filename(executor_filename: &str) -> String {
    format!("docs/{}.md", basename(executor_filename))
}

/// Every file path named by a structure snapshot, depth-first, for seeding
/// one executor subtask per file during Alignment.
fn list_files(snapshot: &StructureSnapshot) -> Vec<String> {
    fn walk(prefix: &str, node: &StructureNode, out: &mut Vec<String>) {
        if let StructureNode::Dir(children) = node {
            for (name, child) in children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                walk(&path, child, out);
            }
        } else {
            out.push(prefix.to_string());
        }
    }
    let mut out = Vec::new();
    for (name, node) in snapshot.root() {
        walk(name, node, &mut out);
    }
    out
}

async fn rate_limit_wait(clock: &dyn Clock, cfg: &RetryConfig) {
    let (lo, hi) = if cfg.min_ms <= cfg.max_ms {
        (cfg.min_ms, cfg.max_ms)
    } else {
        (cfg.max_ms, cfg.min_ms)
    };
    let delay_ms = if lo == hi { lo } else { rand::thread_rng().gen_range(lo..=hi) };
    clock.sleep(Duration::from_millis(delay_ms)).await;
}

/// Per-file bookkeeping the Assignment phase tracks toward Completion
/// detection (§4.2 phase 3).
struct FileState {
    executor_id: Uuid,
    executor_accepted: bool,
    tester_passed: bool,
}

/// Run the Coordinator's full Alignment → Assignment → Completion loop
/// until the target completes or `token` is cancelled. Intended to be
/// wrapped in an `orc_service::AgentTask` closure handed to the Supervisor
/// (§4.4).
#[allow(clippy::too_many_arguments)]
pub async fn run(
    service: Arc<OrchestratorService>,
    negotiation: Arc<AlignmentNegotiation>,
    provider: Arc<dyn ProviderAdapter>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    target: String,
    token: CancellationToken,
) -> Result<(), String> {
    let agreed_tree = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        result = align(&service, &negotiation, provider.as_ref(), clock.as_ref(), &config, &target) => result?,
    };

    let mut files = HashMap::new();
    for filename in list_files(&agreed_tree) {
        let id = service
            .enqueue_subtask(
                Role::Executor,
                filename.clone(),
                format!("Write the complete contents of `{filename}` for the target: {target}"),
                None,
                None,
            )
            .await
            .map_err(|e| e.to_string())?;
        files.insert(filename, FileState { executor_id: id, executor_accepted: false, tester_passed: false });
    }
    tracing::info!(files = files.len(), "coordinator: alignment complete, executor subtasks seeded");

    if files.is_empty() {
        tracing::info!("coordinator: empty target tree, nothing to do");
        return Ok(());
    }

    let mut executor_id_to_filename: HashMap<Uuid, String> =
        files.iter().map(|(name, state)| (state.executor_id, name.clone())).collect();

    let mut feedback = service.coordinator_feedback().await;
    loop {
        let report = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            report = feedback.recv() => report,
        };
        let Some(report) = report else {
            return Err("coordinator feedback channel closed".to_string());
        };

        handle_report(&service, &config, &mut files, &mut executor_id_to_filename, report).await;

        if !files.is_empty() && files.values().all(|f| f.executor_accepted && f.tester_passed) {
            tracing::info!("coordinator: target complete, all files accepted and tested");
            return Ok(());
        }
    }
}

async fn align(
    service: &OrchestratorService,
    negotiation: &AlignmentNegotiation,
    provider: &dyn ProviderAdapter,
    clock: &dyn Clock,
    config: &CoordinatorConfig,
    target: &str,
) -> Result<StructureSnapshot, String> {
    rate_limit_wait(clock, &config.rate_limit).await;

    let prompt = ALIGNMENT_TEMPLATE.replace("{target}", target);
    let own_tree = match call_with_retry(
        provider,
        clock,
        &prompt,
        &config.model.model,
        config.model.temperature,
        config.model.max_tokens,
        config.request_timeout,
        &RetryConfig { max_attempts: 1, ..RetryConfig::default() },
    )
    .await
    {
        Ok(ProviderResponse::Text(text)) => parse_tree(&text),
        Ok(ProviderResponse::Binary) => StructureSnapshot::empty(),
        Err(e) => return Err(format!("coordinator alignment call failed: {e}")),
    };

    let structurer_tree = negotiation.await_proposal().await;
    let agreed = if structurer_tree == own_tree {
        structurer_tree
    } else {
        negotiation.request_revision().await;
        let revised = negotiation.await_proposal().await;
        if revised == own_tree {
            revised
        } else {
            // §4.5: further disagreement beyond the one allowed revision is
            // resolved by taking the Coordinator's tree verbatim.
            own_tree
        }
    };
    negotiation.settle(agreed.clone()).await;
    service.update_structure(agreed.clone()).await;
    Ok(agreed)
}

async fn handle_report(
    service: &OrchestratorService,
    config: &CoordinatorConfig,
    files: &mut HashMap<String, FileState>,
    executor_id_to_filename: &mut HashMap<Uuid, String>,
    report: Report,
) {
    match report.role {
        Role::Executor => handle_executor_report(service, config, files, executor_id_to_filename, report).await,
        Role::Tester => handle_tester_report(service, config, files, report).await,
        Role::Documenter => {
            if let Err(e) = service.mark_accepted(report.subtask_id).await {
                tracing::warn!(id = %report.subtask_id, error = %e, "coordinator: mark_accepted rejected for documenter subtask");
            }
        }
    }
}

async fn handle_executor_report(
    service: &OrchestratorService,
    config: &CoordinatorConfig,
    files: &mut HashMap<String, FileState>,
    executor_id_to_filename: &mut HashMap<Uuid, String>,
    report: Report,
) {
    let Some(state) = files.get_mut(&report.filename) else {
        tracing::warn!(filename = %report.filename, "coordinator: executor report for an unknown file");
        return;
    };

    if report.payload.trim().is_empty() {
        // §8 boundary behavior: empty payload is low confidence, refine.
        refine_or_fail(service, config, state.executor_id, "empty payload, please produce content").await;
        return;
    }

    let tester_text = format!("Write and evaluate tests for `{}`.", report.filename);
    match service
        .enqueue_subtask(Role::Tester, tester_filename(&report.filename), tester_text, Some(state.executor_id), None)
        .await
    {
        Ok(_) => {}
        Err(e) => tracing::warn!(filename = %report.filename, error = %e, "coordinator: failed to enqueue tester subtask"),
    }

    let doc_text = format!("Write documentation for `{}`.", report.filename);
    match service
        .enqueue_subtask(Role::Documenter, documenter_filename(&report.filename), doc_text, Some(state.executor_id), None)
        .await
    {
        Ok(_) => {}
        Err(e) => tracing::warn!(filename = %report.filename, error = %e, "coordinator: failed to enqueue documenter subtask"),
    }

    executor_id_to_filename.insert(state.executor_id, report.filename.clone());
}

async fn handle_tester_report(
    service: &OrchestratorService,
    config: &CoordinatorConfig,
    files: &mut HashMap<String, FileState>,
    report: Report,
) {
    let Some(subtask) = service.get_subtask(report.subtask_id).await else {
        return;
    };
    let Some(executor_id) = subtask.parent else {
        return;
    };
    let Some((filename, state)) = files.iter_mut().find(|(_, s)| s.executor_id == executor_id) else {
        return;
    };

    let metrics = parse_metrics(&report.payload);
    let acceptable = config.confidence.get(&Role::Tester).is_some_and(|c| c.is_acceptable(&metrics));

    if acceptable {
        if let Err(e) = service.mark_accepted(report.subtask_id).await {
            tracing::warn!(id = %report.subtask_id, error = %e, "coordinator: mark_accepted rejected for tester subtask");
        }
        if let Err(e) = service.mark_accepted(executor_id).await {
            tracing::warn!(id = %executor_id, error = %e, "coordinator: mark_accepted rejected for executor subtask");
        }
        state.executor_accepted = true;
        state.tester_passed = true;
    } else {
        let filename = filename.clone();
        tracing::info!(%filename, "coordinator: tester metrics below threshold, refining executor subtask");
        refine_or_fail(service, config, executor_id, "prior attempt failed tests, please revise").await;
    }
}

async fn refine_or_fail(service: &OrchestratorService, config: &CoordinatorConfig, executor_id: Uuid, reason: &str) {
    let Some(subtask) = service.get_subtask(executor_id).await else {
        return;
    };
    if subtask.attempt + 1 >= config.max_refinement_attempts {
        if let Err(e) = service.mark_failed(executor_id, reason).await {
            tracing::warn!(id = %executor_id, error = %e, "coordinator: mark_failed rejected");
        }
        return;
    }
    let refined_text = format!("{}\n\nRevision instruction: {}", subtask.text, reason);
    if let Err(e) = service.requeue_with_refined_text(executor_id, refined_text).await {
        tracing::warn!(id = %executor_id, error = %e, "coordinator: requeue_with_refined_text rejected");
    }
}
