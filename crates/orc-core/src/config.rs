use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::role::Role;

/// Per-agent model assignment (§3: "each agent's assigned model, provider,
/// temperature, and token cap").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentModelConfig {
    /// Name of the upstream provider, opaque to this crate (consumed by the
    /// Provider Adapter, which is out of scope here — §6).
    pub provider: String,
    /// Model identifier to pass through to the Provider Adapter.
    pub model: String,
    #[serde(default = "default_temperature")]
    /// Sampling temperature.
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    /// Output token cap.
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

/// Per-role retry/backoff delay bounds (§4.3): uniform random in
/// `[min_ms, max_ms]`, then doubled, then quadrupled, bounded by `max_ms`
/// scaled to the attempt, up to `max_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_min_ms")]
    /// Lower bound of the first backoff delay, in milliseconds.
    pub min_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    /// Upper bound of the first backoff delay, in milliseconds.
    pub max_ms: u64,
    #[serde(default = "default_max_attempts")]
    /// Maximum number of Provider call attempts before a subtask fails.
    pub max_attempts: u32,
}

fn default_retry_min_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_ms: default_retry_min_ms(),
            max_ms: default_retry_max_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Confidence scoring configuration for one role (§4.2): a metric-name to
/// weight map, and the threshold the weighted sum must meet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Per-metric weight. Must sum to `1.0` within a small epsilon (§9).
    pub weights: HashMap<String, f64>,
    #[serde(default = "default_threshold")]
    /// The minimum weighted sum for a report to be acceptable.
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl ConfidenceConfig {
    const WEIGHT_SUM_EPSILON: f64 = 1e-6;

    /// Validate the weight-sum invariant decided in §9: weights must sum to
    /// `1.0 ± epsilon`. An empty weight map is rejected, not silently
    /// accepted as "sum 0".
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.weights.is_empty() {
            return Err(CoreError::InvalidConfig(
                "confidence weights must not be empty".to_string(),
            ));
        }
        let sum: f64 = self.weights.values().sum();
        if (sum - 1.0).abs() > Self::WEIGHT_SUM_EPSILON {
            return Err(CoreError::InvalidConfig(format!(
                "confidence weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }

    /// Weighted sum of `metrics` against this role's configured weights
    /// (§4.2 "Confidence is computed per role as a weighted sum of the
    /// metrics"). A metric named in the weights but absent from `metrics`
    /// contributes zero, rather than being treated as an error — a worker
    /// that didn't report a metric shouldn't get credit for it.
    pub fn score(&self, metrics: &HashMap<String, f64>) -> f64 {
        self.weights
            .iter()
            .map(|(name, weight)| weight * metrics.get(name).copied().unwrap_or(0.0))
            .sum()
    }

    /// Whether `metrics` clears this role's acceptance threshold (§4.2).
    pub fn is_acceptable(&self, metrics: &HashMap<String, f64>) -> bool {
        self.score(metrics) >= self.threshold
    }
}

/// On-disk paths for logs, repository, and structure snapshot (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_logs_dir")]
    /// Directory the log tail is mirrored to.
    pub logs_dir: PathBuf,
    #[serde(default = "default_repo_dir")]
    /// Working tree root for the Repository Gateway.
    pub repo_dir: PathBuf,
    #[serde(default = "default_config_path")]
    /// Path this configuration document is persisted to.
    pub config_path: PathBuf,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("./data/logs")
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from("./data/repo")
}

fn default_config_path() -> PathBuf {
    PathBuf::from("./orchestrator.toml")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            repo_dir: default_repo_dir(),
            config_path: default_config_path(),
        }
    }
}

/// The process-wide configuration record (§3). One instance is the state of
/// record; it is mutable at runtime via `update_config`/`update_config_item`,
/// persisted before acknowledging (§10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Natural-language description of what to build.
    pub target: String,
    /// Model assignment for the Coordinator.
    pub coordinator_model: AgentModelConfig,
    /// Model assignment for the Structurer.
    pub structurer_model: AgentModelConfig,
    /// Model assignment per worker role.
    pub worker_models: HashMap<Role, AgentModelConfig>,
    /// Retry/backoff bounds per worker role.
    #[serde(default)]
    pub worker_retry: HashMap<Role, RetryConfig>,
    /// Coordinator's own self rate-limit bounds before each Provider call.
    #[serde(default)]
    pub coordinator_rate_limit: RetryConfig,
    /// Confidence scoring configuration per role.
    pub confidence: HashMap<Role, ConfidenceConfig>,
    /// On-disk paths.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Claim lease, in milliseconds. Default: 2x the worker request timeout.
    #[serde(default = "default_claim_lease_ms")]
    pub claim_lease_ms: u64,
    /// Per-request timeout to the Provider Adapter, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Worker poll timeout: how long `claim_next` suspends before the caller
    /// must re-ask (§4.1).
    #[serde(default = "default_worker_poll_timeout_ms")]
    pub worker_poll_timeout_ms: u64,
    /// Soft cap on a role queue's pending length before the Coordinator is
    /// paused from emitting more of that role (§4.1).
    #[serde(default = "default_queue_soft_cap")]
    pub queue_soft_cap: usize,
    /// In-memory log tail size, in lines (§3, §9 decision: 10,000).
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
    /// Bound on each subscriber's outbound delta buffer (§4.1 Fan-out discipline).
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Reserved policy knob (§9 decision): must be `false` in this
    /// implementation; rejected at validation if `true`.
    #[serde(default)]
    pub parallel_roles: bool,
}

fn default_claim_lease_ms() -> u64 {
    20_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_worker_poll_timeout_ms() -> u64 {
    5_000
}

fn default_queue_soft_cap() -> usize {
    1_000
}

fn default_log_tail_lines() -> usize {
    10_000
}

fn default_subscriber_buffer() -> usize {
    256
}

impl OrchestratorConfig {
    /// Validate the record as a whole: every role must have model, retry,
    /// and confidence entries; confidence weights must sum to 1.0;
    /// `parallel_roles` must be `false` (§9).
    pub fn validate(&self) -> Result<(), CoreError> {
        for role in Role::ALL {
            if !self.worker_models.contains_key(&role) {
                return Err(CoreError::InvalidConfig(format!(
                    "missing model config for role {role}"
                )));
            }
            match self.confidence.get(&role) {
                Some(cfg) => cfg.validate()?,
                None => {
                    return Err(CoreError::InvalidConfig(format!(
                        "missing confidence config for role {role}"
                    )))
                }
            }
        }
        if self.parallel_roles {
            return Err(CoreError::InvalidConfig(
                "parallel_roles is reserved and not yet supported".to_string(),
            ));
        }
        if self.claim_lease_ms < self.request_timeout_ms {
            return Err(CoreError::InvalidConfig(
                "claim_lease_ms must be at least request_timeout_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a configuration from a TOML file on disk.
    pub fn load(path: &std::path::Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| CoreError::InvalidConfig(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Persist this configuration back to its configured path as pretty TOML.
    pub fn persist(&self) -> Result<(), CoreError> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| CoreError::InvalidConfig(format!("serializing config: {e}")))?;
        std::fs::write(&self.paths.config_path, rendered)
            .map_err(|e| CoreError::InvalidConfig(format!("writing config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> OrchestratorConfig {
        let model = AgentModelConfig {
            provider: "anthropic".to_string(),
            model: "claude".to_string(),
            temperature: 0.2,
            max_tokens: 2048,
        };
        let mut worker_models = HashMap::new();
        for role in Role::ALL {
            worker_models.insert(role, model.clone());
        }
        let mut confidence = HashMap::new();
        for role in Role::ALL {
            let mut weights = HashMap::new();
            weights.insert("tests_passed".to_string(), 0.6);
            weights.insert("syntax_score".to_string(), 0.4);
            confidence.insert(
                role,
                ConfidenceConfig {
                    weights,
                    threshold: 0.5,
                },
            );
        }
        OrchestratorConfig {
            target: "write a calculator".to_string(),
            coordinator_model: model.clone(),
            structurer_model: model,
            worker_models,
            worker_retry: HashMap::new(),
            coordinator_rate_limit: RetryConfig::default(),
            confidence,
            paths: PathsConfig::default(),
            claim_lease_ms: 20_000,
            request_timeout_ms: 10_000,
            worker_poll_timeout_ms: 5_000,
            queue_soft_cap: 1_000,
            log_tail_lines: 10_000,
            subscriber_buffer: 256,
            parallel_roles: false,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn confidence_weights_must_sum_to_one() {
        let mut cfg = sample_config();
        cfg.confidence
            .get_mut(&Role::Executor)
            .unwrap()
            .weights
            .insert("readability".to_string(), 0.5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parallel_roles_true_is_rejected() {
        let mut cfg = sample_config();
        cfg.parallel_roles = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_role_model_is_rejected() {
        let mut cfg = sample_config();
        cfg.worker_models.remove(&Role::Tester);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn claim_lease_shorter_than_request_timeout_is_rejected() {
        let mut cfg = sample_config();
        cfg.claim_lease_ms = 1_000;
        cfg.request_timeout_ms = 10_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = sample_config();
        let rendered = toml::to_string_pretty(&cfg).unwrap();
        let reloaded: OrchestratorConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reloaded.target, cfg.target);
        assert_eq!(reloaded.claim_lease_ms, cfg.claim_lease_ms);
        assert_eq!(reloaded.worker_models.len(), cfg.worker_models.len());
    }

    #[test]
    fn score_weights_reported_metrics_and_ignores_missing() {
        let mut weights = HashMap::new();
        weights.insert("tests_passed".to_string(), 0.6);
        weights.insert("syntax_score".to_string(), 0.4);
        let cfg = ConfidenceConfig {
            weights,
            threshold: 0.5,
        };
        let mut metrics = HashMap::new();
        metrics.insert("tests_passed".to_string(), 1.0);
        assert!((cfg.score(&metrics) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn is_acceptable_compares_against_threshold() {
        let mut weights = HashMap::new();
        weights.insert("tests_passed".to_string(), 1.0);
        let cfg = ConfidenceConfig {
            weights,
            threshold: 0.8,
        };
        let mut metrics = HashMap::new();
        metrics.insert("tests_passed".to_string(), 0.9);
        assert!(cfg.is_acceptable(&metrics));
        metrics.insert("tests_passed".to_string(), 0.5);
        assert!(!cfg.is_acceptable(&metrics));
    }
}
