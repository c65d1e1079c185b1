use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use memoir_agenda::SessionAgenda;
use memoir_agents::{
    BiographyOrchestrator, Interviewer, SessionContext, SessionScribe, SimulatedUser, TerminalUser,
};
use memoir_biography::Biography;
use memoir_config::AppConfig;
use memoir_core::{
    EvaluationLogger, Message, MessageRouter, MessageType, Role, SessionSignals,
};
use memoir_llm::{HttpEngine, SharedEngine};
use memoir_memory::{HashEmbedder, MemoryBank, QuestionBank, SharedEmbedder};

/// How the human side of the conversation is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    /// Print questions, read answers from stdin.
    Terminal,
    /// An LLM-driven user agent answers instead of a human.
    Simulated,
    /// No local user channel; an external caller posts user messages.
    Api,
}

/// Owns one interview session end to end.
///
/// `run()` boots the interviewer, then polls: the memory-threshold
/// auto-update scheduler, the inactivity timeout, and the turn cap. On any
/// end condition it drains the agents, runs the final biography/agenda
/// pass, and persists the banks.
pub struct SessionEngine {
    ctx: Arc<SessionContext>,
    interviewer: Arc<Interviewer>,
    scribe: Arc<SessionScribe>,
    orchestrator: Arc<BiographyOrchestrator>,
    mode: InteractionMode,
    selected_topics: Vec<String>,
    started: Instant,
}

impl SessionEngine {
    /// Production constructor: OpenAI-compatible HTTP engine from config.
    pub fn new(config: AppConfig, user_id: impl Into<String>, mode: InteractionMode) -> Result<Self> {
        let engine: SharedEngine = Arc::new(HttpEngine::new(&config.llm));
        Self::with_engine(config, user_id, mode, engine)
    }

    /// Constructor with an injected LLM engine (tests, simulations).
    pub fn with_engine(
        config: AppConfig,
        user_id: impl Into<String>,
        mode: InteractionMode,
        engine: SharedEngine,
    ) -> Result<Self> {
        let user_id = user_id.into();
        let user_logs = config.user_logs_dir(&user_id);
        let user_data = config.user_data_dir(&user_id);
        let embedder: SharedEmbedder = Arc::new(HashEmbedder::default());

        // The latest saved agenda was written for this session; its id plus
        // one is the new monotonic session id.
        let mut agenda = SessionAgenda::load_last(&user_id, &user_logs)?;
        let session_id = agenda.session_id + 1;
        agenda.session_id = session_id;
        agenda.user_id = user_id.clone();

        let memory_bank = MemoryBank::load(&user_logs, embedder.clone(), session_id)?;
        let historical = QuestionBank::load(&user_logs, embedder.clone(), session_id)?;
        let proposed = QuestionBank::new(embedder.clone(), session_id);
        let biography = Biography::load(&user_id, &user_data, None)?;

        let signals = Arc::new(SessionSignals::new());
        let router = Arc::new(MessageRouter::new(signals.clone()));
        let eval = Arc::new(EvaluationLogger::new(&user_logs, session_id));
        {
            let eval = eval.clone();
            router.set_feedback_hook(Arc::new(move |previous, message| {
                let kind = match message.kind {
                    MessageType::Like => "like",
                    MessageType::Skip => "skip",
                    MessageType::Conversation => "conversation",
                };
                eval.log_feedback(&previous.content, kind);
            }));
        }

        let ctx = Arc::new(SessionContext {
            user_id: user_id.clone(),
            session_id,
            signals,
            router: router.clone(),
            engine: engine.clone(),
            memory_bank: Arc::new(RwLock::new(memory_bank)),
            historical_questions: Arc::new(RwLock::new(historical)),
            proposed_questions: Arc::new(RwLock::new(proposed)),
            agenda: Arc::new(Mutex::new(agenda)),
            biography: Arc::new(biography),
            eval,
            config: config.clone(),
        });

        info!(user = %user_id, session = session_id, ?mode, "interview session initialized");

        let interviewer = Arc::new(Interviewer::new(ctx.clone(), None));
        let scribe = SessionScribe::new(ctx.clone());
        let orchestrator = Arc::new(BiographyOrchestrator::new(ctx.clone()));

        // Subscriptions: the interviewer and the scribe hear the user; the
        // scribe also hears the interviewer; the user channel hears the
        // interviewer.
        router.subscribe(&[Role::User], interviewer.clone());
        router.subscribe(&[Role::Interviewer, Role::User], scribe.clone());
        match mode {
            InteractionMode::Terminal => {
                router.subscribe(
                    &[Role::Interviewer],
                    Arc::new(TerminalUser::new(router.clone(), ctx.signals.clone(), None)),
                );
            }
            InteractionMode::Simulated => {
                router.subscribe(
                    &[Role::Interviewer],
                    Arc::new(SimulatedUser::new(
                        router.clone(),
                        engine,
                        config.llm.max_retries,
                    )),
                );
            }
            InteractionMode::Api => {}
        }

        Ok(Self {
            ctx,
            interviewer,
            scribe,
            orchestrator,
            mode,
            selected_topics: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn session_id(&self) -> u32 {
        self.ctx.session_id
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Operator-chosen topics for the next session's agenda. When empty,
    /// topics are extracted from this session's memories instead.
    pub fn set_selected_topics(&mut self, topics: Vec<String>) {
        self.selected_topics = topics;
    }

    /// External entry point for API-mode callers.
    pub fn post_user_message(&self, content: &str) -> bool {
        self.ctx
            .router
            .post(Message::conversation(Role::User, content))
    }

    pub fn post_user_skip(&self) -> bool {
        self.ctx.router.post(Message::skip(Role::User))
    }

    pub fn post_user_like(&self) -> bool {
        self.ctx.router.post(Message::like(Role::User))
    }

    pub fn post_interviewer_message(&self, content: &str) -> bool {
        self.ctx
            .router
            .post(Message::conversation(Role::Interviewer, content))
    }

    /// End the session without waiting for timeout or turn cap.
    pub fn end_session(&self) {
        self.ctx.signals.end_session();
    }

    /// Memories captured during this session (bounded wait for in-flight
    /// scribe work).
    pub async fn get_session_memories(&self, include_processed: bool) -> Vec<memoir_memory::Memory> {
        self.scribe
            .get_session_memories(include_processed, false, true)
            .await
    }

    /// Run the session to completion and tear down.
    pub async fn run(&self) -> Result<()> {
        info!(session = self.ctx.session_id, "session started");

        // Graceful shutdown on SIGINT/SIGTERM for locally driven modes.
        if self.mode != InteractionMode::Api {
            let signals = self.ctx.signals.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received, ending session");
                    signals.end_session();
                }
            });
        }

        // The interviewer opens the conversation.
        if self.mode != InteractionMode::Api {
            self.interviewer.take_turn(None).await;
        }

        let session = &self.ctx.config.session;
        let timeout = Duration::from_secs(session.timeout_minutes * 60);
        let check_interval = (session.memory_threshold / 5).max(1);
        let mut last_checked = 0usize;
        let mut ticker = tokio::time::interval(Duration::from_millis(100));

        loop {
            ticker.tick().await;

            if !self.ctx.signals.is_in_progress() {
                break;
            }
            if self.ctx.signals.idle_time() >= timeout {
                info!(
                    minutes = session.timeout_minutes,
                    "session timed out after inactivity"
                );
                self.ctx.signals.end_session();
                break;
            }
            if let Some(max_turns) = session.max_turns {
                if self.ctx.signals.user_message_count() >= max_turns {
                    info!(max_turns, "turn cap reached, ending session");
                    self.ctx.signals.end_session();
                    break;
                }
            }

            // Evaluate the memory threshold every `max(1, threshold/5)`
            // user messages.
            let count = self.ctx.signals.user_message_count();
            if count >= last_checked + check_interval {
                last_checked = count;
                self.maybe_trigger_auto_update().await;
            }
        }

        self.teardown().await
    }

    /// Launch an incremental biography update when enough unprocessed
    /// memories have accumulated and none is in flight.
    async fn maybe_trigger_auto_update(&self) {
        if !self.ctx.signals.is_in_progress() || self.orchestrator.update_in_progress() {
            return;
        }
        let threshold = self.ctx.config.session.memory_threshold;
        if self.scribe.unprocessed_count() < threshold {
            return;
        }

        // Snapshot and drain without waiting on in-flight scribe tasks.
        let memories = self.scribe.get_session_memories(false, true, false).await;
        if memories.is_empty() {
            return;
        }
        info!(memories = memories.len(), "memory threshold reached, launching auto-update");

        let orchestrator = self.orchestrator.clone();
        let summary = self.ctx.router.rendered_history(40);
        tokio::spawn(async move {
            match orchestrator.incremental_update(memories, summary).await {
                Ok(ran) if !ran => warn!("auto-update skipped: another update in flight"),
                Ok(_) => {}
                Err(err) => warn!(%err, "auto-update failed"),
            }
        });
    }

    /// Signal the end, drain the agents, run the final pass, persist the
    /// banks, and record session statistics. A final-save failure
    /// propagates, but the bank snapshots are attempted regardless.
    async fn teardown(&self) -> Result<()> {
        self.ctx.signals.end_session();
        info!("running final biography and agenda update");

        let final_result = self
            .orchestrator
            .final_update(&self.scribe, &self.selected_topics)
            .await;
        if let Err(err) = &final_result {
            warn!(%err, "final update failed");
        }

        let user_logs = self.ctx.config.user_logs_dir(&self.ctx.user_id);
        let bank_result = self.ctx.memory_bank.read().await.save(&user_logs);
        let question_result = self.ctx.historical_questions.read().await.save(&user_logs);

        let history = self.ctx.router.history();
        let user_messages = history.iter().filter(|m| m.role == Role::User).count();
        let interviewer_messages = history
            .iter()
            .filter(|m| m.role == Role::Interviewer)
            .count();
        let memories = self.scribe.get_session_memories(true, false, false).await;
        self.ctx.eval.log_conversation_statistics(
            user_messages,
            interviewer_messages,
            memories.len(),
            self.started.elapsed().as_secs_f64(),
        );

        self.ctx.router.shutdown().await;
        self.ctx.signals.mark_completed();
        info!("session completed");

        final_result?;
        bank_result?;
        question_result?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use memoir_biography::SectionRef;
    use memoir_llm::LlmEngine;

    /// Deterministic engine for full-session tests: picks the canned
    /// response by recognizing which agent's prompt it received, so
    /// concurrent agents cannot shuffle a queue.
    struct PromptRoutedEngine;

    const MEMORY_RESPONSE: &str = r#"<tool_calls>
  <update_memory_bank>
    <title>Boston childhood</title>
    <text>The user grew up in Boston.</text>
    <importance>7</importance>
    <temp_id>TEMP_1</temp_id>
  </update_memory_bank>
  <update_memory_bank>
    <title>Corner store</title>
    <text>The user's family ran a corner store.</text>
    <importance>6</importance>
    <temp_id>TEMP_2</temp_id>
  </update_memory_bank>
  <add_historical_question>
    <question>Where did you grow up?</question>
    <memory_ids>TEMP_1, TEMP_2</memory_ids>
  </add_historical_question>
</tool_calls>"#;

    #[async_trait]
    impl LlmEngine for PromptRoutedEngine {
        async fn invoke(&self, prompt: &str) -> anyhow::Result<String> {
            let response = if prompt.contains("<interviewer_persona>") {
                "<tool_calls><respond_to_user><response>Where did you grow up?</response></respond_to_user></tool_calls>"
            } else if prompt.contains("You are being interviewed") {
                "I grew up in Boston, above our family's corner store."
            } else if prompt.contains("maintaining the user's memory bank") {
                MEMORY_RESPONSE
            } else if prompt.contains("Record what the") {
                "<tool_calls><update_session_agenda><note>Grew up in Boston above the family store.</note></update_session_agenda></tool_calls>"
            } else if prompt.contains("deserves follow-up questions") {
                "Nothing new to ask right now."
            } else if prompt.contains("planner of a biography-writing team") {
                "<tool_calls><add_plan><action>create</action><path>1 Early Life</path><update_plan>Introduce the Boston childhood.</update_plan></add_plan></tool_calls>"
            } else if prompt.contains("section writer on a biography team") {
                "<tool_calls><add_section><path>1 Early Life</path><content>The subject grew up in Boston [MEM_a].</content></add_section></tool_calls>"
            } else if prompt.contains("List the main topics") {
                "Childhood\nFamily"
            } else if prompt.contains("The interview session has ended") {
                "<tool_calls><update_last_meeting_summary><summary>We talked about a Boston childhood.</summary></update_last_meeting_summary><update_user_portrait><key>Hometown</key><value>Boston</value></update_user_portrait></tool_calls>"
            } else if prompt.contains("Rebuild the interview agenda") {
                "<tool_calls><add_interview_question><topic>Family</topic><question>What was the store called?</question><question_id>1</question_id></add_interview_question></tool_calls>"
            } else {
                "No action."
            };
            Ok(response.to_string())
        }
    }

    fn engine_config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.data_dir = dir.join("data").to_string_lossy().to_string();
        config.storage.logs_dir = dir.join("logs").to_string_lossy().to_string();
        config
    }

    #[tokio::test]
    async fn timed_out_session_tears_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = engine_config(dir.path());
        config.session.timeout_minutes = 0; // immediate timeout

        let engine = SessionEngine::with_engine(
            config,
            "alice",
            InteractionMode::Api,
            Arc::new(PromptRoutedEngine),
        )
        .unwrap();
        assert_eq!(engine.session_id(), 1);

        engine.run().await.unwrap();

        let ctx = engine.context();
        assert!(!ctx.signals.is_in_progress());
        assert!(ctx.signals.is_completed());

        let logs = dir.path().join("logs/alice");
        assert!(logs.join("memory_bank_content.json").exists());
        assert!(logs.join("historical_question_bank_content.json").exists());
        assert!(logs.join("session_agenda_1.json").exists());
        assert!(
            dir.path().join("data/alice/biography_1.json").exists(),
            "final pass writes the first biography version"
        );
        assert!(
            logs.join("evaluations/session_1/conversation_statistics.csv")
                .exists()
        );
    }

    #[tokio::test]
    async fn messages_posted_after_completion_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = engine_config(dir.path());
        config.session.timeout_minutes = 0;

        let engine = SessionEngine::with_engine(
            config,
            "alice",
            InteractionMode::Api,
            Arc::new(PromptRoutedEngine),
        )
        .unwrap();
        engine.run().await.unwrap();

        assert!(!engine.post_user_message("too late"));
        assert!(engine.context().router.history().is_empty());
    }

    #[tokio::test]
    async fn simulated_session_reaches_turn_cap_and_builds_biography() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = engine_config(dir.path());
        config.session.memory_threshold = 2; // auto-update after one Q/A
        config.session.max_turns = Some(2);

        let engine = SessionEngine::with_engine(
            config,
            "bob",
            InteractionMode::Simulated,
            Arc::new(PromptRoutedEngine),
        )
        .unwrap();
        engine.run().await.unwrap();

        let ctx = engine.context();
        let history = ctx.router.history();
        let user_turns = history.iter().filter(|m| m.role == Role::User).count();
        assert!(user_turns >= 2, "turn cap ends the session, got {user_turns}");

        // The scribe minted memories and linked the historical question.
        let bank = ctx.memory_bank.read().await;
        assert!(bank.len() >= 2);
        drop(bank);
        let historical = ctx.historical_questions.read().await;
        assert!(!historical.is_empty());
        drop(historical);

        // The auto-update (or the final pass) built the section.
        let section = ctx
            .biography
            .get_section(SectionRef::Path("1 Early Life"), false)
            .unwrap()
            .expect("biography section exists");
        assert!(section.memory_ids.contains(&"MEM_a".to_string()));

        // The final pass rewrote the agenda for the next session.
        let agenda = ctx.agenda.lock().await;
        assert_eq!(agenda.last_meeting_summary, "We talked about a Boston childhood.");
        assert!(agenda.get_user_portrait_str().contains("Hometown: Boston"));
        assert!(agenda.find_question("1").is_some());
    }

    #[tokio::test]
    async fn session_ids_are_monotonic_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = engine_config(dir.path());
        config.session.timeout_minutes = 0;

        let first = SessionEngine::with_engine(
            config.clone(),
            "carol",
            InteractionMode::Api,
            Arc::new(PromptRoutedEngine),
        )
        .unwrap();
        assert_eq!(first.session_id(), 1);
        first.run().await.unwrap();

        let second = SessionEngine::with_engine(
            config,
            "carol",
            InteractionMode::Api,
            Arc::new(PromptRoutedEngine),
        )
        .unwrap();
        assert_eq!(second.session_id(), 2);
        second.run().await.unwrap();

        // The second session's final pass bumps the biography version.
        assert!(dir.path().join("data/carol/biography_2.json").exists());
    }
}
