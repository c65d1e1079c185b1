use anyhow::Result;
use tokio::sync::Mutex;

use memoir_core::{EventFilter, EventStream};
use memoir_llm::{SharedEngine, invoke_with_retry};

/// The plumbing every agent composes over: a name, an engine handle with
/// retry policy, the private event stream, and the configured loop bounds.
pub struct AgentCore {
    name: String,
    engine: SharedEngine,
    max_retries: u32,
    pub max_consideration_iterations: usize,
    pub max_events_len: usize,
    events: Mutex<EventStream>,
}

impl AgentCore {
    pub fn new(
        name: impl Into<String>,
        engine: SharedEngine,
        config: &memoir_config::AppConfig,
    ) -> Self {
        Self {
            name: name.into(),
            engine,
            max_retries: config.llm.max_retries,
            max_consideration_iterations: config.session.max_consideration_iterations,
            max_events_len: config.session.max_events_len,
            events: Mutex::new(EventStream::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add_event(
        &self,
        sender: impl Into<String>,
        tag: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.events.lock().await.add(sender, tag, content);
    }

    /// Replay-window rendering of matching events, oldest first.
    pub async fn events_rendered(&self, filters: &[EventFilter]) -> Vec<String> {
        self.events
            .lock()
            .await
            .rendered_window(filters, self.max_events_len)
    }

    /// All matching events without the window, for callers that split off
    /// the current exchange themselves.
    pub async fn events_rendered_all(&self, filters: &[EventFilter]) -> Vec<String> {
        self.events.lock().await.rendered(filters)
    }

    /// The last `n` matching events, ignoring the configured window.
    pub async fn events_tail(&self, filters: &[EventFilter], n: usize) -> Vec<String> {
        self.events.lock().await.rendered_window(filters, n)
    }

    pub async fn event_count(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Invoke the engine with the shared backoff policy, recording nothing;
    /// callers add prompt/response events with their own tags.
    pub async fn call_engine(&self, prompt: &str) -> Result<String> {
        invoke_with_retry(self.engine.as_ref(), prompt, self.max_retries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use memoir_config::AppConfig;
    use memoir_llm::ScriptedEngine;

    #[tokio::test]
    async fn events_respect_replay_window() {
        let mut config = AppConfig::default();
        config.session.max_events_len = 2;
        let core = AgentCore::new(
            "Test",
            Arc::new(ScriptedEngine::new(["ok"])),
            &config,
        );

        for i in 0..5 {
            core.add_event("User", "message", format!("m{i}")).await;
        }
        let rendered = core.events_rendered(&[EventFilter::tag("message")]).await;
        assert_eq!(rendered.len(), 2);
        assert!(rendered[1].contains("m4"));
        assert_eq!(core.event_count().await, 5, "full stream retained");
    }

    #[tokio::test]
    async fn call_engine_returns_scripted_response() {
        let core = AgentCore::new(
            "Test",
            Arc::new(ScriptedEngine::new(["scripted"])),
            &AppConfig::default(),
        );
        assert_eq!(core.call_engine("prompt").await.unwrap(), "scripted");
    }
}
