//! The Executor/Tester/Documenter worker loop (§4.3): one role-parameterized
//! loop shared by all three roles, since they only differ in their prompt
//! template and in whether they consult a prior report. Unlike the
//! Coordinator or Structurer, a worker never surfaces an error out of its
//! own loop — Provider failures are handled locally (`mark_failed`) and the
//! loop keeps claiming, so the only way `run` returns is cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use orc_core::{AgentModelConfig, OrchestratorConfig, Role, RetryConfig, Subtask};
use orc_provider::{call_with_retry, Clock, ProviderAdapter, ProviderResponse};
use orc_service::OrchestratorService;
use tokio_util::sync::CancellationToken;

/// Tuning a single worker role needs out of the process-wide configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Model assignment for this role.
    pub model: AgentModelConfig,
    /// Retry/backoff bounds for this role.
    pub retry: RetryConfig,
    /// Per-request deadline passed to the Provider Adapter.
    pub request_timeout: Duration,
    /// How long `claim_next` may suspend before this worker re-asks.
    pub poll_timeout: Duration,
}

impl WorkerConfig {
    /// Pull this role's model/retry settings out of the process config.
    pub fn from_orchestrator_config(config: &OrchestratorConfig, role: Role) -> Self {
        let model = config
            .worker_models
            .get(&role)
            .cloned()
            .unwrap_or_else(|| config.coordinator_model.clone());
        let retry = config.worker_retry.get(&role).cloned().unwrap_or_default();
        Self {
            model,
            retry,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            poll_timeout: Duration::from_millis(config.worker_poll_timeout_ms),
        }
    }
}

const EXECUTOR_TEMPLATE: &str = "\
You are the executor worker. Write the complete contents of the file `{filename}`.

Instruction:
{text}

Respond with the file contents only, inside a single code block.";

const TESTER_TEMPLATE: &str = "\
You are the tester worker. Write and evaluate tests for the file `{filename}`.

Instruction:
{text}

Produced content:
{content}

Respond with a report naming the metrics tests_passed and coverage, inside a single code block.";

const DOCUMENTER_TEMPLATE: &str = "\
You are the documenter worker. Write documentation for the file `{filename}`.

Instruction:
{text}

Produced content:
{content}

Respond with the documentation only, inside a single code block.";

fn build_prompt(role: Role, filename: &str, text: &str, prior_content: Option<&str>) -> String {
    let template = match role {
        Role::Executor => EXECUTOR_TEMPLATE,
        Role::Tester => TESTER_TEMPLATE,
        Role::Documenter => DOCUMENTER_TEMPLATE,
    };
    template
        .replace("{filename}", filename)
        .replace("{text}", text)
        .replace("{content}", prior_content.unwrap_or(""))
}

/// Strip the first markdown code fence from `payload`, returning its
/// contents; if no fence is found, return the payload unchanged. Unlike the
/// teacher's `extract_code_block`, this never looks for a language-tagged
/// fence specifically — workers have no notion of a target language, only
/// a target file.
fn strip_code_fence(payload: &str) -> String {
    let Some(start) = payload.find("```") else {
        return payload.trim().to_string();
    };
    let after_marker = start + 3;
    let code_start = payload[after_marker..]
        .find('\n')
        .map(|i| after_marker + i + 1)
        .unwrap_or(after_marker);

    match payload[code_start..].find("```") {
        Some(end) => payload[code_start..code_start + end].trim().to_string(),
        None => payload.trim().to_string(),
    }
}

/// Run one role's worker loop until `token` is cancelled. Intended to be
/// wrapped in an `orc_service::AgentTask` closure and handed to the
/// Supervisor (§4.4) — `token` is the one the Supervisor passes to that
/// closure at spawn time.
pub async fn run(
    role: Role,
    worker_id: impl Into<String>,
    service: Arc<OrchestratorService>,
    provider: Arc<dyn ProviderAdapter>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    token: CancellationToken,
) -> Result<(), String> {
    let worker_id = worker_id.into();
    loop {
        if token.is_cancelled() {
            return Ok(());
        }
        let claimed = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            claimed = service.claim_next(role, worker_id.clone(), config.poll_timeout) => claimed,
        };
        let Some(id) = claimed else {
            continue;
        };
        service.heartbeat(role, id).await;

        let Some(subtask) = service.get_subtask(id).await else {
            tracing::warn!(%id, %role, "claimed subtask vanished from the ledger");
            continue;
        };

        process_one(role, &service, provider.as_ref(), clock.as_ref(), &config, subtask).await;
    }
}

async fn process_one(
    role: Role,
    service: &OrchestratorService,
    provider: &dyn ProviderAdapter,
    clock: &dyn Clock,
    config: &WorkerConfig,
    subtask: Subtask,
) {
    let prior_content = match (role, subtask.parent) {
        (Role::Executor, _) | (_, None) => None,
        (_, Some(parent)) => service.latest_report(parent).await.map(|r| r.payload),
    };
    let prompt = build_prompt(role, &subtask.filename, &subtask.text, prior_content.as_deref());

    let started = Instant::now();
    let result = call_with_retry(
        provider,
        clock,
        &prompt,
        &config.model.model,
        config.model.temperature,
        config.model.max_tokens,
        config.request_timeout,
        &config.retry,
    )
    .await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(ProviderResponse::Binary) => {
            tracing::warn!(id = %subtask.id, %role, "provider returned a binary payload, failing subtask");
            if let Err(e) = service.mark_failed(subtask.id, "BinaryPayload").await {
                tracing::warn!(id = %subtask.id, %role, error = %e, "mark_failed rejected");
            }
        }
        Ok(ProviderResponse::Text(payload)) => {
            let cleaned = strip_code_fence(&payload);
            match service
                .submit_report(role, subtask.id, subtask.filename.clone(), cleaned, duration_ms)
                .await
            {
                Ok(()) => {
                    service.heartbeat(role, subtask.id).await;
                    tracing::info!(id = %subtask.id, %role, duration_ms, "report submitted");
                }
                Err(e) => tracing::warn!(id = %subtask.id, %role, error = %e, "submit_report rejected"),
            }
        }
        Err(e) => {
            tracing::warn!(id = %subtask.id, %role, error = %e, "provider exhausted retries, failing subtask");
            if let Err(e) = service.mark_failed(subtask.id, e.to_string()).await {
                tracing::warn!(id = %subtask.id, %role, error = %e, "mark_failed rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::{AgentModelConfig, ConfidenceConfig, PathsConfig, SubtaskStatus};
    use orc_provider::fake::{InstantClock, ScriptedProvider};
    use orc_provider::ProviderError;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn model() -> AgentModelConfig {
        AgentModelConfig {
            provider: "anthropic".to_string(),
            model: "claude".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            model: model(),
            retry: RetryConfig {
                min_ms: 1,
                max_ms: 2,
                max_attempts: 3,
            },
            request_timeout: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(20),
        }
    }

    fn sample_config(dir: &std::path::Path) -> OrchestratorConfig {
        let m = model();
        let mut worker_models = HashMap::new();
        let mut confidence = HashMap::new();
        for role in Role::ALL {
            worker_models.insert(role, m.clone());
            let mut weights = HashMap::new();
            weights.insert("tests_passed".to_string(), 1.0);
            confidence.insert(role, ConfidenceConfig { weights, threshold: 0.5 });
        }
        OrchestratorConfig {
            target: "write a calculator".to_string(),
            coordinator_model: m.clone(),
            structurer_model: m,
            worker_models,
            worker_retry: HashMap::new(),
            coordinator_rate_limit: RetryConfig::default(),
            confidence,
            paths: PathsConfig {
                logs_dir: dir.join("logs"),
                repo_dir: dir.join("repo"),
                config_path: dir.join("orchestrator.toml"),
            },
            claim_lease_ms: 20_000,
            request_timeout_ms: 10_000,
            worker_poll_timeout_ms: 20,
            queue_soft_cap: 1_000,
            log_tail_lines: 100,
            subscriber_buffer: 8,
            parallel_roles: false,
        }
    }

    #[test]
    fn strip_code_fence_extracts_fenced_content() {
        let payload = "Here you go:\n```python\ndef add(a, b):\n    return a + b\n```\nThanks";
        assert_eq!(strip_code_fence(payload), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn strip_code_fence_returns_unfenced_payload_as_is() {
        assert_eq!(strip_code_fence("plain text"), "plain text");
    }

    #[tokio::test]
    async fn executor_worker_submits_a_stripped_report() {
        let dir = tempdir().unwrap();
        let service = Arc::new(OrchestratorService::new(sample_config(dir.path())));
        let id = service
            .enqueue_subtask(Role::Executor, "add.py", "write add(a, b)", None, None)
            .await
            .unwrap();

        let provider: Arc<dyn ProviderAdapter> = Arc::new(ScriptedProvider::new(vec![Ok(
            ProviderResponse::Text("```python\ndef add(a, b): return a + b\n```".to_string()),
        )]));
        let clock: Arc<dyn Clock> = Arc::new(InstantClock);
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let handle = tokio::spawn({
            let service = service.clone();
            async move {
                run(Role::Executor, "w1", service, provider, clock, worker_config(), worker_token).await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let status = service.full_status().await;
        assert_eq!(status.subtask_statuses.get(&id), Some(&SubtaskStatus::CodeReceived));
    }

    #[tokio::test]
    async fn binary_payload_fails_the_subtask_without_a_report() {
        let dir = tempdir().unwrap();
        let service = Arc::new(OrchestratorService::new(sample_config(dir.path())));
        let id = service
            .enqueue_subtask(Role::Executor, "logo.png", "embed the logo", None, None)
            .await
            .unwrap();

        let provider: Arc<dyn ProviderAdapter> = Arc::new(ScriptedProvider::new(vec![Ok(ProviderResponse::Binary)]));
        let clock: Arc<dyn Clock> = Arc::new(InstantClock);
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = tokio::spawn({
            let service = service.clone();
            async move {
                run(Role::Executor, "w1", service, provider, clock, worker_config(), worker_token).await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let status = service.full_status().await;
        assert_eq!(status.subtask_statuses.get(&id), Some(&SubtaskStatus::Failed));
    }

    #[tokio::test]
    async fn exhausted_retries_mark_the_subtask_failed() {
        let dir = tempdir().unwrap();
        let service = Arc::new(OrchestratorService::new(sample_config(dir.path())));
        let id = service
            .enqueue_subtask(Role::Executor, "add.py", "write add", None, None)
            .await
            .unwrap();

        let provider: Arc<dyn ProviderAdapter> = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Timeout),
            Err(ProviderError::Timeout),
            Err(ProviderError::Timeout),
        ]));
        let clock: Arc<dyn Clock> = Arc::new(InstantClock);
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let handle = tokio::spawn({
            let service = service.clone();
            async move {
                run(Role::Executor, "w1", service, provider, clock, worker_config(), worker_token).await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let status = service.full_status().await;
        assert_eq!(status.subtask_statuses.get(&id), Some(&SubtaskStatus::Failed));
    }

    #[tokio::test]
    async fn tester_worker_sees_the_executors_produced_content() {
        let dir = tempdir().unwrap();
        let service = Arc::new(OrchestratorService::new(sample_config(dir.path())));

        let exec_id = service
            .enqueue_subtask(Role::Executor, "add.py", "write add", None, None)
            .await
            .unwrap();
        service
            .claim_next(Role::Executor, "w0", Duration::from_millis(10))
            .await;
        service
            .submit_report(Role::Executor, exec_id, "add.py", "def add(a, b): return a + b", 5)
            .await
            .unwrap();

        let tester_id = service
            .enqueue_subtask(Role::Tester, "add.py", "test add", Some(exec_id), None)
            .await
            .unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ProviderResponse::Text(
            "tests_passed=1.0".to_string(),
        ))]));
        let clock: Arc<dyn Clock> = Arc::new(InstantClock);
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let provider_dyn: Arc<dyn ProviderAdapter> = provider.clone();
        let handle = tokio::spawn({
            let service = service.clone();
            async move {
                run(Role::Tester, "t1", service, provider_dyn, clock, worker_config(), worker_token).await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let status = service.full_status().await;
        assert_eq!(status.subtask_statuses.get(&tester_id), Some(&SubtaskStatus::CodeReceived));
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
