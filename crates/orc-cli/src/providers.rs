//! Resolves the `provider` string named in an `AgentModelConfig` (§3) into
//! a concrete `ProviderAdapter`, reading the vendor API key from the
//! environment the same way the teacher's backends read credentials out of
//! `ModelConfig::api_key` — except this config record deliberately has no
//! `api_key` field (§3 doesn't name one; it belongs to process environment,
//! not the persisted, operator-editable configuration document).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use orc_provider::{HttpProviderAdapter, HttpProviderKind, ProviderAdapter};

/// One entry in the provider registry: which wire dialect to speak, which
/// environment variable carries the API key, and the default base URL.
struct ProviderSpec {
    kind: HttpProviderKind,
    api_key_env: &'static str,
    default_base_url: &'static str,
}

fn lookup(provider: &str) -> anyhow::Result<ProviderSpec> {
    match provider {
        "anthropic" | "claude" => Ok(ProviderSpec {
            kind: HttpProviderKind::Claude,
            api_key_env: "ANTHROPIC_API_KEY",
            default_base_url: "https://api.anthropic.com",
        }),
        "openai" => Ok(ProviderSpec {
            kind: HttpProviderKind::OpenAi,
            api_key_env: "OPENAI_API_KEY",
            default_base_url: "https://api.openai.com",
        }),
        other => anyhow::bail!("unknown provider '{other}'; expected 'anthropic' or 'openai'"),
    }
}

/// A one-adapter-per-distinct-provider-name cache, since every worker role
/// sharing a provider (the common case) should share one `reqwest::Client`
/// rather than opening a fresh connection pool per role.
pub struct ProviderCache {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    /// The adapter for `provider`, building and caching it on first use.
    /// Fails fast at startup (§7 kind 4, fatal local) if the provider name
    /// is unrecognized or its API key environment variable is unset —
    /// better to abort before any agent starts than to fail every Provider
    /// call at runtime.
    pub fn get(&mut self, provider: &str) -> anyhow::Result<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = self.adapters.get(provider) {
            return Ok(adapter.clone());
        }
        let spec = lookup(provider)?;
        let api_key = std::env::var(spec.api_key_env)
            .with_context(|| format!("{} must be set to use provider '{provider}'", spec.api_key_env))?;
        let base_url = std::env::var(format!("{}_BASE_URL", spec.api_key_env.trim_end_matches("_API_KEY")))
            .unwrap_or_else(|_| spec.default_base_url.to_string());
        let adapter: Arc<dyn ProviderAdapter> = Arc::new(HttpProviderAdapter::new(spec.kind, api_key, base_url));
        self.adapters.insert(provider.to_string(), adapter.clone());
        Ok(adapter)
    }
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // `std::env::set_var` mutates process-global state, so every test that
    // touches it serializes behind this lock rather than racing each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn unknown_provider_name_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut cache = ProviderCache::new();
        let err = cache.get("not-a-real-provider").unwrap_err();
        assert!(err.to_string().contains("unknown provider"));
    }

    #[test]
    fn missing_api_key_env_var_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("ANTHROPIC_API_KEY");
        let mut cache = ProviderCache::new();
        let err = cache.get("anthropic").unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn resolved_adapters_are_cached_per_provider_name() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("ANTHROPIC_API_KEY", "test-key");
        let mut cache = ProviderCache::new();
        let first = cache.get("anthropic").unwrap();
        let second = cache.get("anthropic").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        std::env::remove_var("ANTHROPIC_API_KEY");
    }

    #[test]
    fn claude_and_anthropic_aliases_resolve_to_the_same_kind() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("ANTHROPIC_API_KEY", "test-key");
        let mut cache = ProviderCache::new();
        assert!(cache.get("claude").is_ok());
        assert!(cache.get("anthropic").is_ok());
        std::env::remove_var("ANTHROPIC_API_KEY");
    }
}
