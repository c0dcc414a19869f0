//! A concrete `ProviderAdapter` speaking the Claude Messages API and the
//! OpenAI-compatible chat-completions API over HTTP. The boundary trait
//! itself is vendor-agnostic (§6); this is one real implementation of it, in
//! the same shape the teacher's `backends/claude.rs`/`backends/openai.rs`
//! use, stripped of tool-calling and streaming — neither concept is named
//! anywhere in this spec, which only needs a single request/response pair
//! per call.

use std::time::Duration;

use async_trait::async_trait;

use crate::{ProviderAdapter, ProviderError, ProviderResponse};

/// Which wire dialect to speak. OpenAI-compatible covers OpenAI itself plus
/// any provider exposing the same `/v1/chat/completions` shape (OpenRouter,
/// Groq, local gateways), matching the teacher's `OpenAiBackend` doc comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpProviderKind {
    /// Anthropic's Messages API.
    Claude,
    /// OpenAI's chat-completions API, or a compatible gateway.
    OpenAi,
}

/// An HTTP-backed `ProviderAdapter` for one vendor account.
pub struct HttpProviderAdapter {
    kind: HttpProviderKind,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl HttpProviderAdapter {
    /// An adapter for `kind`, authenticating with `api_key` against `base_url`.
    pub fn new(kind: HttpProviderKind, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: api_key.into(),
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<serde_json::Value, ProviderError> {
        let resp = request.timeout(timeout).send().await.map_err(classify_transport_error)?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(format!("malformed response body: {e}")))?;

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ProviderError::ServerError { status: status.as_u16() });
        }
        if !status.is_success() {
            return Err(ProviderError::Invalid(format!("{status}: {body}")));
        }
        Ok(body)
    }
}

fn classify_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Invalid(e.to_string())
    }
}

#[async_trait]
impl ProviderAdapter for HttpProviderAdapter {
    async fn call(
        &self,
        prompt: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        match self.kind {
            HttpProviderKind::Claude => self.call_claude(prompt, model, temperature, max_tokens, timeout).await,
            HttpProviderKind::OpenAi => self.call_openai(prompt, model, temperature, max_tokens, timeout).await,
        }
    }
}

impl HttpProviderAdapter {
    async fn call_claude(
        &self,
        prompt: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let request = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);

        let resp_body = self.send(request, timeout).await?;
        let content = resp_body["content"]
            .as_array()
            .ok_or_else(|| ProviderError::Invalid("missing content in Claude response".to_string()))?;

        let text = content
            .iter()
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ProviderResponse::Text(text))
    }

    async fn call_openai(
        &self,
        prompt: &str,
        model: &str,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let request = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body);

        let resp_body = self.send(request, timeout).await?;
        let text = resp_body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Invalid("missing message content in OpenAI response".to_string()))?
            .to_string();
        Ok(ProviderResponse::Text(text))
    }
}
