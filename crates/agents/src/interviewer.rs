//! The interviewer: produces the next utterance or a recall query given the
//! conversation so far and the session agenda.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use memoir_core::{EventFilter, Message, MessageRouter, Role, SessionSignals, Subscriber};
use memoir_prompt::PromptMode;
use memoir_prompt::interviewer::{InterviewerPromptArgs, prompt as interviewer_prompt};
use memoir_tools::{
    Tool, ToolCallError, ToolOutput, ToolParam, ToolSpec, ToolRegistry, dispatch_tool_calls,
};

use crate::base::AgentCore;
use crate::speech::{SharedTextToSpeech, speak_best_effort};
use crate::tools::RecallTool;
use crate::SessionContext;

/// `respond_to_user` — post the interviewer's next utterance.
struct RespondToUserTool {
    router: Arc<MessageRouter>,
    tts: Option<SharedTextToSpeech>,
}

#[async_trait]
impl Tool for RespondToUserTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "respond_to_user".to_string(),
            description: "Say your next utterance to the user.".to_string(),
            params: vec![ToolParam {
                name: "response".to_string(),
                description: "the utterance".to_string(),
                required: true,
            }],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let response = args
            .get("response")
            .map(String::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if response.is_empty() {
            return Ok(ToolOutput::failure("respond_to_user requires a response"));
        }
        speak_best_effort(&self.tts, &response).await;
        self.router
            .post(Message::conversation(Role::Interviewer, response.clone()));
        Ok(ToolOutput::ok(response))
    }
}

/// `end_conversation` — signal the engine that the session should end.
struct EndConversationTool {
    signals: Arc<SessionSignals>,
}

#[async_trait]
impl Tool for EndConversationTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "end_conversation".to_string(),
            description: "End the interview session gracefully.".to_string(),
            params: vec![],
        }
    }

    async fn run(&self, _args: &HashMap<String, String>) -> Result<ToolOutput> {
        self.signals.end_session();
        Ok(ToolOutput::ok("session end requested"))
    }
}

pub struct Interviewer {
    ctx: Arc<SessionContext>,
    core: AgentCore,
    registry: ToolRegistry,
    mode: PromptMode,
    tts: Option<SharedTextToSpeech>,
}

impl Interviewer {
    pub fn new(ctx: Arc<SessionContext>, tts: Option<SharedTextToSpeech>) -> Self {
        let core = AgentCore::new("Interviewer", ctx.engine.clone(), &ctx.config);
        let mode = if ctx.config.session.use_baseline_prompt {
            PromptMode::Baseline
        } else {
            PromptMode::Normal
        };

        let mut registry = ToolRegistry::default();
        registry.register(Box::new(RecallTool::new(ctx.memory_bank.clone())));
        registry.register(Box::new(RespondToUserTool {
            router: ctx.router.clone(),
            tts: tts.clone(),
        }));
        registry.register(Box::new(EndConversationTool {
            signals: ctx.signals.clone(),
        }));

        Self {
            ctx,
            core,
            registry,
            mode,
            tts,
        }
    }

    /// One interviewer turn. `None` is the boot turn that opens the session.
    ///
    /// Bounded loop: each iteration either issues a recall (and loops) or
    /// takes exactly one terminal action (`respond_to_user` or
    /// `end_conversation`).
    pub async fn take_turn(&self, message: Option<&Message>) {
        if !self.ctx.signals.is_in_progress() {
            return;
        }

        if let Some(message) = message {
            self.core
                .add_event(message.role.as_str(), "user_message", &message.content)
                .await;
        }

        let mut iterations = 0;
        while iterations < self.core.max_consideration_iterations {
            let prompt = self.build_prompt().await;
            self.core
                .add_event(self.core.name(), format!("interview_prompt_{iterations}"), &prompt)
                .await;

            let response = match self.core.call_engine(&prompt).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(%err, "interviewer engine call failed");
                    self.core
                        .add_event("system", "error", format!("engine failure: {err}"))
                        .await;
                    return;
                }
            };
            self.core
                .add_event(self.core.name(), format!("interview_response_{iterations}"), &response)
                .await;

            match dispatch_tool_calls(&self.registry, &response).await {
                Ok(outcomes) => {
                    let mut recalled = false;
                    for outcome in &outcomes {
                        let rendered = match &outcome.result {
                            Ok(output) => output.output.clone(),
                            Err(err) => format!("tool error: {err}"),
                        };
                        match outcome.call.name.as_str() {
                            "recall" => {
                                self.core
                                    .add_event(self.core.name(), "recall_response", rendered)
                                    .await;
                                recalled = true;
                            }
                            "respond_to_user" => {
                                self.core
                                    .add_event(self.core.name(), "interviewer_response", &rendered)
                                    .await;
                                self.log_latency(message, &rendered);
                            }
                            _ => {
                                self.core
                                    .add_event("system", &outcome.call.name, rendered)
                                    .await;
                            }
                        }
                    }
                    if !recalled {
                        return;
                    }
                }
                Err(ToolCallError::NoToolCalls) | Err(ToolCallError::Malformed(_)) => {
                    // Direct-output fallback: treat the raw text as the
                    // utterance rather than losing the turn.
                    let utterance = response.trim().to_string();
                    if !utterance.is_empty() {
                        self.core
                            .add_event(self.core.name(), "direct_output_fallback", &utterance)
                            .await;
                        speak_best_effort(&self.tts, &utterance).await;
                        self.ctx
                            .router
                            .post(Message::conversation(Role::Interviewer, utterance.clone()));
                        self.log_latency(message, &utterance);
                    }
                    return;
                }
            }

            iterations += 1;
        }

        self.core
            .add_event(
                "system",
                "error",
                format!(
                    "exceeded maximum consideration iterations ({})",
                    self.core.max_consideration_iterations
                ),
            )
            .await;
    }

    fn log_latency(&self, message: Option<&Message>, utterance: &str) {
        if let Some(message) = message {
            let latency = (Utc::now() - message.timestamp)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64();
            self.ctx
                .eval
                .log_response_latency(&message.id.to_string(), latency, utterance.len());
        }
    }

    async fn build_prompt(&self) -> String {
        let user_portrait = self.ctx.portrait_str().await;
        let last_meeting_summary = self.ctx.last_meeting_summary().await;
        let questions_and_notes = self.ctx.questions_and_notes_str(false).await;
        let chat_history = self.ctx.router.rendered_history(self.core.max_events_len);

        let current_events = self
            .core
            .events_tail(&[EventFilter::tag("user_message")], 1)
            .await
            .join("\n");
        let recent_utterances = self
            .core
            .events_tail(
                &[
                    EventFilter::sender_and_tag(self.core.name(), "interviewer_response"),
                    EventFilter::sender_and_tag(self.core.name(), "direct_output_fallback"),
                ],
                3,
            )
            .await
            .join("\n");
        let tool_descriptions = self
            .registry
            .describe(&["recall", "respond_to_user", "end_conversation"]);

        interviewer_prompt(self.mode, &InterviewerPromptArgs {
            user_portrait: &user_portrait,
            last_meeting_summary: &last_meeting_summary,
            chat_history: &chat_history,
            current_events: &current_events,
            questions_and_notes: &questions_and_notes,
            recent_utterances: &recent_utterances,
            tool_descriptions: &tool_descriptions,
        })
    }
}

#[async_trait]
impl Subscriber for Interviewer {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn on_message(&self, message: Message) {
        self.take_turn(Some(&message)).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use memoir_llm::ScriptedEngine;

    fn respond(text: &str) -> String {
        format!(
            "<tool_calls>\n  <respond_to_user>\n    <response>{text}</response>\n  </respond_to_user>\n</tool_calls>"
        )
    }

    #[tokio::test]
    async fn boot_turn_posts_an_interviewer_message() {
        let engine = Arc::new(ScriptedEngine::new([respond("Welcome back! How are you?")]));
        let ctx = test_context(engine).await;
        let interviewer = Interviewer::new(ctx.clone(), None);

        interviewer.take_turn(None).await;

        let history = ctx.router.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Interviewer);
        assert_eq!(history[0].content, "Welcome back! How are you?");
    }

    #[tokio::test]
    async fn recall_loops_then_responds() {
        let engine = Arc::new(ScriptedEngine::new([
            "<tool_calls><recall><query>college</query><reasoning>user mentioned it</reasoning></recall></tool_calls>".to_string(),
            respond("You studied physics, right?"),
        ]));
        let ctx = test_context(engine.clone()).await;
        let interviewer = Interviewer::new(ctx.clone(), None);

        let incoming = Message::conversation(Role::User, "like I said back in college");
        interviewer.take_turn(Some(&incoming)).await;

        let history = ctx.router.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].content.contains("physics"));
        // Two engine calls: the recall iteration, then the respond.
        assert_eq!(engine.recorded_prompts().await.len(), 2);
    }

    #[tokio::test]
    async fn plain_text_response_falls_back_to_direct_output() {
        let engine = Arc::new(ScriptedEngine::new(["Just tell me about your day."]));
        let ctx = test_context(engine).await;
        let interviewer = Interviewer::new(ctx.clone(), None);

        interviewer.take_turn(None).await;

        let history = ctx.router.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Just tell me about your day.");
    }

    #[tokio::test]
    async fn end_conversation_flips_the_session_flag() {
        let engine = Arc::new(ScriptedEngine::new([
            "<tool_calls><end_conversation></end_conversation></tool_calls>",
        ]));
        let ctx = test_context(engine).await;
        let interviewer = Interviewer::new(ctx.clone(), None);

        assert!(ctx.signals.is_in_progress());
        interviewer.take_turn(None).await;
        assert!(!ctx.signals.is_in_progress());
    }

    #[tokio::test]
    async fn no_turn_taken_after_session_end() {
        let engine = Arc::new(ScriptedEngine::new([respond("should never appear")]));
        let ctx = test_context(engine.clone()).await;
        let interviewer = Interviewer::new(ctx.clone(), None);

        ctx.signals.end_session();
        interviewer.take_turn(None).await;
        assert!(engine.recorded_prompts().await.is_empty());
    }
}
