//! LLM engine seam — the only interface between agents and a model backend.
//!
//! Agents hold an `Arc<dyn LlmEngine>` and call [`invoke_with_retry`]. The
//! production backend is an OpenAI-compatible chat endpoint; tests and the
//! simulated user run on [`ScriptedEngine`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use memoir_config::LlmConfig;

/// A synchronous-looking prompt→completion call executed off the hot path.
/// Every response is expected to carry a tagged tool-call block; parsing is
/// the caller's concern.
#[async_trait]
pub trait LlmEngine: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String>;
}

pub type SharedEngine = Arc<dyn LlmEngine>;

/// Invoke with exponential backoff on transport errors: 1 s, 2 s, 4 s, …
/// up to `max_retries` attempts. The final error is returned unchanged.
pub async fn invoke_with_retry(
    engine: &dyn LlmEngine,
    prompt: &str,
    max_retries: u32,
) -> Result<String> {
    let attempts = max_retries.max(1);
    let mut delay = Duration::from_secs(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match engine.invoke(prompt).await {
            Ok(output) => return Ok(output),
            Err(err) => {
                warn!(attempt = attempt + 1, %err, "engine invocation failed");
                last_err = Some(err);
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    Err(last_err.expect("at least one attempt was made"))
}

// ── HTTP backend ─────────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEngine {
    pub fn new(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmEngine for HttpEngine {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("no API key configured for {}", self.base_url);
        };

        let endpoint = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ]
        });

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;
        if !status.is_success() {
            bail!("chat endpoint error ({status}): {body}");
        }

        let content = body
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str());

        match content {
            Some(text) => Ok(text.to_string()),
            None => bail!("chat response missing content: {body}"),
        }
    }
}

// ── Scripted backend ─────────────────────────────────────────────────────────

/// Deterministic engine fed with canned responses, consumed in order.
/// Once the queue drains, the last response repeats, so loops that prompt
/// until a terminal action still converge.
#[derive(Default)]
pub struct ScriptedEngine {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, response: impl Into<String>) {
        self.responses.lock().await.push_back(response.into());
    }

    /// Prompts seen so far, for assertions on what the agent actually asked.
    pub async fn recorded_prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl LlmEngine for ScriptedEngine {
    async fn invoke(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().await.push(prompt.to_string());

        if let Some(next) = self.responses.lock().await.pop_front() {
            *self.last.lock().await = Some(next.clone());
            return Ok(next);
        }
        if let Some(last) = self.last.lock().await.clone() {
            return Ok(last);
        }
        bail!("scripted engine has no responses")
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
