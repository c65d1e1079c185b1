//! User-facing input channels: the terminal reader and the simulated user
//! used for agent-vs-agent runs.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use memoir_core::{Message, MessageRouter, Role, SessionSignals, Subscriber};
use memoir_llm::{SharedEngine, invoke_with_retry};
use memoir_prompt::user::{DEFAULT_PERSONA, SimulatedUserArgs, simulated_user};

use crate::speech::SharedSpeechToText;

/// Terminal channel: prints interviewer utterances and posts what the
/// human types back. `/skip`, `/like`, and `/end` map to the message types
/// and the end signal.
pub struct TerminalUser {
    router: Arc<MessageRouter>,
    signals: Arc<SessionSignals>,
    stt: Option<SharedSpeechToText>,
}

impl TerminalUser {
    pub fn new(
        router: Arc<MessageRouter>,
        signals: Arc<SessionSignals>,
        stt: Option<SharedSpeechToText>,
    ) -> Self {
        Self {
            router,
            signals,
            stt,
        }
    }

    /// One line of user input: voice when the capability is present (falling
    /// back to typed input on failure), stdin otherwise.
    async fn read_input(&self) -> Option<String> {
        if let Some(stt) = &self.stt {
            match stt.record_and_transcribe().await {
                Ok(text) if !text.trim().is_empty() => return Some(text),
                Ok(_) => {}
                Err(err) => warn!(%err, "voice input failed, falling back to keyboard"),
            }
        }

        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            print!("> ");
            let _ = std::io::stdout().flush();
            match std::io::stdin().read_line(&mut line) {
                Ok(0) => None, // EOF
                Ok(_) => Some(line.trim_end().to_string()),
                Err(_) => None,
            }
        })
        .await
        .ok()
        .flatten()
    }
}

#[async_trait]
impl Subscriber for TerminalUser {
    fn name(&self) -> &str {
        "User"
    }

    async fn on_message(&self, message: Message) {
        println!("\nInterviewer: {}\n", message.content);

        loop {
            let Some(input) = self.read_input().await else {
                self.signals.end_session();
                return;
            };
            match input.trim() {
                "" => continue,
                "/end" => {
                    self.signals.end_session();
                    return;
                }
                "/skip" => {
                    self.router.post(Message::skip(Role::User));
                    return;
                }
                "/like" => {
                    // Feedback only; keep reading for the actual answer.
                    self.router.post(Message::like(Role::User));
                }
                answer => {
                    self.router.post(Message::conversation(Role::User, answer));
                    return;
                }
            }
        }
    }
}

/// LLM-driven stand-in for the human subject (`--user-agent` runs).
pub struct SimulatedUser {
    router: Arc<MessageRouter>,
    engine: SharedEngine,
    persona: String,
    max_retries: u32,
}

impl SimulatedUser {
    pub fn new(router: Arc<MessageRouter>, engine: SharedEngine, max_retries: u32) -> Self {
        Self {
            router,
            engine,
            persona: DEFAULT_PERSONA.to_string(),
            max_retries,
        }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }
}

#[async_trait]
impl Subscriber for SimulatedUser {
    fn name(&self) -> &str {
        "UserAgent"
    }

    async fn on_message(&self, message: Message) {
        let prompt = simulated_user(&SimulatedUserArgs {
            persona: &self.persona,
            chat_history: &self.router.rendered_history(20),
            interviewer_question: &message.content,
        });

        let answer = match invoke_with_retry(self.engine.as_ref(), &prompt, self.max_retries).await
        {
            Ok(answer) => answer,
            Err(err) => {
                warn!(%err, "simulated user engine failed; skipping the question");
                self.router.post(Message::skip(Role::User));
                return;
            }
        };

        let answer = answer.trim();
        if answer.eq_ignore_ascii_case("skip") {
            self.router.post(Message::skip(Role::User));
        } else {
            self.router.post(Message::conversation(Role::User, answer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoir_llm::ScriptedEngine;

    #[tokio::test]
    async fn simulated_user_posts_conversation_reply() {
        let signals = Arc::new(SessionSignals::new());
        let router = Arc::new(MessageRouter::new(signals));
        let engine = Arc::new(ScriptedEngine::new(["I grew up in Boston."]));
        let user = SimulatedUser::new(router.clone(), engine, 1);

        user.on_message(Message::conversation(Role::Interviewer, "Where did you grow up?"))
            .await;

        let history = router.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "I grew up in Boston.");
    }

    #[tokio::test]
    async fn simulated_user_maps_skip_sentinel() {
        let signals = Arc::new(SessionSignals::new());
        let router = Arc::new(MessageRouter::new(signals));
        let engine = Arc::new(ScriptedEngine::new(["SKIP"]));
        let user = SimulatedUser::new(router.clone(), engine, 1);

        user.on_message(Message::conversation(Role::Interviewer, "A hard question"))
            .await;

        let history = router.history();
        assert_eq!(history[0].content, "Skip the question");
    }
}
