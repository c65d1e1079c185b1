//! The session scribe: on every interviewer→user Q/A pair it concurrently
//! (a) updates agenda notes and proposes deduplicated follow-up questions,
//! and (b) mints memories and registers the asked question in the
//! historical bank. The two pipelines run under independent locks and
//! mutate disjoint stores.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use memoir_core::{EventFilter, Message, Role, Subscriber};
use memoir_memory::{Memory, SharedMemoryBank, SharedQuestionBank, combined_search};
use memoir_prompt::scribe as scribe_prompts;
use memoir_tools::{
    Tool, ToolCallError, ToolOutput, ToolParam, ToolSpec, ToolRegistry, dispatch_tool_calls,
    extract_tag, extract_tool_arguments, extract_tool_calls_block,
};

use crate::SessionContext;
use crate::SharedAgenda;
use crate::base::AgentCore;
use crate::tools::RecallTool;

/// State the scribe shares with its memory-pipeline tools.
struct ScribeState {
    /// Memories minted since the last drain.
    new_memories: StdMutex<Vec<Memory>>,
    /// Every memory minted this session.
    all_memories: StdMutex<Vec<Memory>>,
    /// Temporary ids (TEMP_n) assigned in prompts, bound to real bank ids.
    memory_id_map: StdMutex<HashMap<String, String>>,
    /// The user utterance currently being processed, used as source quote.
    current_user_response: StdMutex<String>,
}

// ── Tools ────────────────────────────────────────────────────────────────────

/// `update_memory_bank` — mint one memory record.
struct UpdateMemoryBankTool {
    memory_bank: SharedMemoryBank,
    state: Arc<ScribeState>,
}

#[async_trait]
impl Tool for UpdateMemoryBankTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "update_memory_bank".to_string(),
            description: "Store one atomic memory extracted from the user's answer.".to_string(),
            params: vec![
                ToolParam {
                    name: "title".to_string(),
                    description: "short title".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "text".to_string(),
                    description: "self-contained summary of one fact or episode".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "importance".to_string(),
                    description: "importance score 1-10".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "temp_id".to_string(),
                    description: "temporary id (TEMP_1, TEMP_2, ...)".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "metadata".to_string(),
                    description: "optional key=value pairs separated by ';'".to_string(),
                    required: false,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let title = args.get("title").ok_or_else(|| anyhow!("missing title"))?;
        let text = args.get("text").ok_or_else(|| anyhow!("missing text"))?;
        let importance: u8 = args
            .get("importance")
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(5);
        let mut metadata = BTreeMap::new();
        if let Some(raw) = args.get("metadata") {
            for pair in raw.split(';') {
                if let Some((key, value)) = pair.split_once('=') {
                    metadata.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }

        let source_quote = self
            .state
            .current_user_response
            .lock()
            .expect("scribe state lock poisoned")
            .clone();

        let memory = self
            .memory_bank
            .write()
            .await
            .add_memory(title, text, importance, source_quote, metadata);

        if let Some(temp_id) = args.get("temp_id") {
            self.state
                .memory_id_map
                .lock()
                .expect("scribe state lock poisoned")
                .insert(temp_id.trim().to_string(), memory.id.clone());
        }
        self.state
            .new_memories
            .lock()
            .expect("scribe state lock poisoned")
            .push(memory.clone());
        self.state
            .all_memories
            .lock()
            .expect("scribe state lock poisoned")
            .push(memory.clone());

        debug!(id = %memory.id, "memory minted");
        Ok(ToolOutput::ok(format!("Stored memory {}", memory.id)))
    }
}

/// `add_historical_question` — register the asked question with the memory
/// ids it produced.
struct AddHistoricalQuestionTool {
    historical: SharedQuestionBank,
    state: Arc<ScribeState>,
}

#[async_trait]
impl Tool for AddHistoricalQuestionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_historical_question".to_string(),
            description: "Record the question the interviewer actually asked, linked to the memories that answer it.".to_string(),
            params: vec![
                ToolParam {
                    name: "question".to_string(),
                    description: "the question text".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "memory_ids".to_string(),
                    description: "comma-separated temporary ids of answering memories".to_string(),
                    required: false,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let question = args
            .get("question")
            .ok_or_else(|| anyhow!("missing question"))?;

        let real_ids: Vec<String> = args
            .get("memory_ids")
            .map(|raw| {
                let map = self
                    .state
                    .memory_id_map
                    .lock()
                    .expect("scribe state lock poisoned");
                raw.split(',')
                    .filter_map(|temp_id| map.get(temp_id.trim()).cloned())
                    .collect()
            })
            .unwrap_or_default();

        let record =
            self.historical
                .write()
                .await
                .add_historical(question, "Interviewer", real_ids);
        Ok(ToolOutput::ok(format!("Recorded question {}", record.id)))
    }
}

/// `update_session_agenda` — attach a note to an agenda question.
struct UpdateSessionAgendaTool {
    agenda: SharedAgenda,
}

#[async_trait]
impl Tool for UpdateSessionAgendaTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "update_session_agenda".to_string(),
            description: "Attach a note with what the user just shared to an agenda question.".to_string(),
            params: vec![
                ToolParam {
                    name: "question_id".to_string(),
                    description: "the [ID] of the answered question; omit for an unbound note".to_string(),
                    required: false,
                },
                ToolParam {
                    name: "note".to_string(),
                    description: "the note text".to_string(),
                    required: true,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let note = args.get("note").ok_or_else(|| anyhow!("missing note"))?;
        let question_id = args
            .get("question_id")
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty());

        self.agenda
            .lock()
            .await
            .add_note(question_id, note)
            .map_err(|err| anyhow!(err))?;
        Ok(ToolOutput::ok("note added"))
    }
}

/// `add_interview_question` — commit a follow-up to the agenda and the
/// proposed bank.
struct AddInterviewQuestionTool {
    agenda: SharedAgenda,
    proposed: SharedQuestionBank,
    proposer: &'static str,
}

#[async_trait]
impl Tool for AddInterviewQuestionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_interview_question".to_string(),
            description: "Add a follow-up question to the session agenda.".to_string(),
            params: vec![
                ToolParam {
                    name: "topic".to_string(),
                    description: "topic category (e.g. 'Career', 'Education')".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "question".to_string(),
                    description: "the question text".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "question_id".to_string(),
                    description: "dotted id ('1', '1.1', ...); at most four levels".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "parent_id".to_string(),
                    description: "id of the parent question; omit for a top-level question".to_string(),
                    required: false,
                },
                ToolParam {
                    name: "parent_text".to_string(),
                    description: "text of the parent question; omit for a top-level question".to_string(),
                    required: false,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let topic = args.get("topic").ok_or_else(|| anyhow!("missing topic"))?;
        let question = args
            .get("question")
            .ok_or_else(|| anyhow!("missing question"))?;
        let question_id = args
            .get("question_id")
            .ok_or_else(|| anyhow!("missing question_id"))?;
        if let Some(parent_id) = args.get("parent_id").filter(|id| !id.trim().is_empty()) {
            if !question_id
                .trim()
                .starts_with(&format!("{}.", parent_id.trim()))
            {
                return Err(anyhow!(
                    "question_id {question_id} does not extend parent_id {parent_id}"
                ));
            }
        }

        self.proposed
            .write()
            .await
            .add_question(question.trim(), self.proposer);
        self.agenda
            .lock()
            .await
            .add_interview_question(topic, question, question_id.trim())
            .map_err(|err| anyhow!(err))?;
        Ok(ToolOutput::ok(format!("Added question {question_id}")))
    }
}

// ── The scribe ───────────────────────────────────────────────────────────────

pub struct SessionScribe {
    ctx: Arc<SessionContext>,
    core: AgentCore,
    state: Arc<ScribeState>,
    registry: ToolRegistry,
    last_interviewer_message: Mutex<Option<Message>>,
    /// Guards the agenda pipeline.
    notes_lock: Mutex<()>,
    /// Guards the memory/question pipeline.
    memory_lock: Mutex<()>,
    /// Count of in-flight Q/A tasks; `processing_in_progress` ⇔ non-zero.
    pending_tasks: watch::Sender<usize>,
    weak: Weak<SessionScribe>,
}

impl SessionScribe {
    pub fn new(ctx: Arc<SessionContext>) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let core = AgentCore::new("SessionScribe", ctx.engine.clone(), &ctx.config);
            let state = Arc::new(ScribeState {
                new_memories: StdMutex::new(Vec::new()),
                all_memories: StdMutex::new(Vec::new()),
                memory_id_map: StdMutex::new(HashMap::new()),
                current_user_response: StdMutex::new(String::new()),
            });

            let mut registry = ToolRegistry::default();
            registry.register(Box::new(UpdateMemoryBankTool {
                memory_bank: ctx.memory_bank.clone(),
                state: state.clone(),
            }));
            registry.register(Box::new(AddHistoricalQuestionTool {
                historical: ctx.historical_questions.clone(),
                state: state.clone(),
            }));
            registry.register(Box::new(UpdateSessionAgendaTool {
                agenda: ctx.agenda.clone(),
            }));
            registry.register(Box::new(AddInterviewQuestionTool {
                agenda: ctx.agenda.clone(),
                proposed: ctx.proposed_questions.clone(),
                proposer: "SessionScribe",
            }));
            registry.register(Box::new(RecallTool::new(ctx.memory_bank.clone())));

            let (pending_tasks, _) = watch::channel(0);
            Self {
                ctx,
                core,
                state,
                registry,
                last_interviewer_message: Mutex::new(None),
                notes_lock: Mutex::new(()),
                memory_lock: Mutex::new(()),
                pending_tasks,
                weak: weak.clone(),
            }
        })
    }

    pub fn processing_in_progress(&self) -> bool {
        *self.pending_tasks.borrow() > 0
    }

    /// Unprocessed memory count, read without waiting. The engine's
    /// auto-update scheduler polls this.
    pub fn unprocessed_count(&self) -> usize {
        self.state
            .new_memories
            .lock()
            .expect("scribe state lock poisoned")
            .len()
    }

    /// Memories captured this session.
    ///
    /// With `wait`, blocks (bounded by the configured drain timeout) until
    /// in-flight Q/A tasks finish. With `clear_processed`, the unprocessed
    /// set is drained while the cumulative set is preserved.
    pub async fn get_session_memories(
        &self,
        include_processed: bool,
        clear_processed: bool,
        wait: bool,
    ) -> Vec<Memory> {
        if wait {
            let timeout = Duration::from_secs(self.ctx.config.session.drain_timeout_secs);
            let mut pending = self.pending_tasks.subscribe();
            let drained =
                tokio::time::timeout(timeout, pending.wait_for(|count| *count == 0)).await;
            if drained.is_err() {
                warn!("timed out waiting for scribe processing; proceeding with current state");
            }
        }

        let memories = if include_processed {
            self.state
                .all_memories
                .lock()
                .expect("scribe state lock poisoned")
                .clone()
        } else {
            self.state
                .new_memories
                .lock()
                .expect("scribe state lock poisoned")
                .clone()
        };

        if clear_processed {
            self.state
                .new_memories
                .lock()
                .expect("scribe state lock poisoned")
                .clear();
        }
        memories
    }

    // ── Q/A processing ───────────────────────────────────────────────────────

    async fn process_qa_pair(&self, interviewer: Message, user: Message) {
        // Both pipelines run concurrently; each serializes on its own lock
        // and mutates disjoint stores.
        tokio::join!(
            self.notes_pipeline(&interviewer, &user),
            self.memory_pipeline(&interviewer, &user),
        );
        self.pending_tasks.send_modify(|count| *count -= 1);
    }

    async fn notes_pipeline(&self, interviewer: &Message, user: &Message) {
        if self.ctx.config.session.use_baseline_prompt {
            return;
        }
        let _guard = self.notes_lock.lock().await;
        self.core
            .add_event(interviewer.role.as_str(), "notes_lock_message", &interviewer.content)
            .await;
        self.core
            .add_event(user.role.as_str(), "notes_lock_message", &user.content)
            .await;

        self.update_session_agenda().await;
        self.propose_followups().await;
    }

    async fn memory_pipeline(&self, interviewer: &Message, user: &Message) {
        let _guard = self.memory_lock.lock().await;
        self.core
            .add_event(interviewer.role.as_str(), "memory_lock_message", &interviewer.content)
            .await;
        self.core
            .add_event(user.role.as_str(), "memory_lock_message", &user.content)
            .await;
        *self
            .state
            .current_user_response
            .lock()
            .expect("scribe state lock poisoned") = user.content.clone();

        let (previous_events, current_qa) = self
            .split_current_qa(&[EventFilter::tag("memory_lock_message")])
            .await;
        let prompt = scribe_prompts::update_memory_question_bank(&scribe_prompts::MemoryUpdateArgs {
            user_portrait: &self.ctx.portrait_str().await,
            previous_events: &previous_events,
            current_qa: &current_qa,
            tool_descriptions: &self
                .registry
                .describe(&["update_memory_bank", "add_historical_question"]),
        });
        self.core
            .add_event(self.core.name(), "update_memory_question_bank_prompt", &prompt)
            .await;

        let Ok(response) = self.core.call_engine(&prompt).await else {
            self.core
                .add_event("system", "error", "memory pipeline engine failure")
                .await;
            return;
        };
        self.core
            .add_event(self.core.name(), "update_memory_question_bank_response", &response)
            .await;
        self.dispatch_and_record(&response).await;
    }

    async fn update_session_agenda(&self) {
        let (previous_events, current_qa) = self
            .split_current_qa(&[EventFilter::tag("notes_lock_message")])
            .await;
        let prompt = scribe_prompts::update_session_agenda(&scribe_prompts::AgendaUpdateArgs {
            user_portrait: &self.ctx.portrait_str().await,
            previous_events: &previous_events,
            current_qa: &current_qa,
            questions_and_notes: &self.ctx.questions_and_notes_str(true).await,
            tool_descriptions: &self.registry.describe(&["update_session_agenda"]),
        });
        self.core
            .add_event(self.core.name(), "update_session_agenda_prompt", &prompt)
            .await;

        let Ok(response) = self.core.call_engine(&prompt).await else {
            self.core
                .add_event("system", "error", "agenda pipeline engine failure")
                .await;
            return;
        };
        self.core
            .add_event(self.core.name(), "update_session_agenda_response", &response)
            .await;
        self.dispatch_and_record(&response).await;
    }

    /// Bounded follow-up proposal loop.
    ///
    /// Each iteration either recalls, proposes questions, or stops. A
    /// proposal whose similarity to either bank exceeds the configured
    /// threshold is held back; the scribe must revise it or explicitly
    /// proceed with `<proceed>true</proceed>`.
    async fn propose_followups(&self) {
        let threshold = self.ctx.config.bank.similarity_threshold;
        let search_k = self.ctx.config.bank.search_k;

        let mut iterations = 0;
        let mut previous_tool_call: Option<String> = None;
        let mut similar_groups: Vec<(String, Vec<(String, f32)>)> = Vec::new();

        while iterations < self.core.max_consideration_iterations {
            let warning = match (&previous_tool_call, similar_groups.is_empty()) {
                (Some(block), false) => {
                    scribe_prompts::similar_questions_warning(block, &similar_groups)
                }
                _ => String::new(),
            };

            let event_stream = self
                .core
                .events_rendered(&[
                    EventFilter::tag("notes_lock_message"),
                    EventFilter::sender_and_tag(self.core.name(), "recall_response"),
                ])
                .await
                .join("\n");
            let prompt =
                scribe_prompts::consider_and_propose_followups(&scribe_prompts::FollowUpArgs {
                    user_portrait: &self.ctx.portrait_str().await,
                    event_stream: &event_stream,
                    questions_and_notes: &self.ctx.questions_and_notes_str(false).await,
                    similar_questions_warning: &warning,
                    tool_descriptions: &self
                        .registry
                        .describe(&["recall", "add_interview_question"]),
                });
            self.core
                .add_event(
                    self.core.name(),
                    format!("consider_and_propose_followups_prompt_{iterations}"),
                    &prompt,
                )
                .await;

            let Ok(response) = self.core.call_engine(&prompt).await else {
                self.core
                    .add_event("system", "error", "follow-up loop engine failure")
                    .await;
                return;
            };
            self.core
                .add_event(
                    self.core.name(),
                    format!("consider_and_propose_followups_response_{iterations}"),
                    &response,
                )
                .await;

            // Explicit override: proceed despite the similarity warning.
            if extract_tag(&response.to_lowercase(), "proceed").as_deref() == Some("true") {
                self.core
                    .add_event(
                        self.core.name(),
                        format!("feedback_loop_{iterations}"),
                        "agent chose to proceed with similar questions",
                    )
                    .await;
                self.log_similarity(&similar_groups, true, "agent chose to proceed");
                self.dispatch_and_record(&response).await;
                return;
            }

            let proposed =
                extract_tool_arguments(&response, "add_interview_question", "question")
                    .unwrap_or_default();

            if proposed.is_empty() {
                if response.contains("<recall>") {
                    self.dispatch_and_record(&response).await;
                } else {
                    return;
                }
            } else {
                similar_groups.clear();
                let historical = self.ctx.historical_questions.read().await;
                let proposed_bank = self.ctx.proposed_questions.read().await;
                for question in &proposed {
                    let close: Vec<(String, f32)> =
                        combined_search(&historical, &proposed_bank, question, search_k)
                            .into_iter()
                            .filter(|hit| hit.similarity >= threshold)
                            .map(|hit| (hit.record.content, hit.similarity))
                            .collect();
                    if !close.is_empty() {
                        similar_groups.push((question.clone(), close));
                    }
                }
                drop(historical);
                drop(proposed_bank);

                if similar_groups.is_empty() {
                    self.log_similarity(
                        &proposed.iter().map(|q| (q.clone(), Vec::new())).collect::<Vec<_>>(),
                        true,
                        "no near-duplicates found",
                    );
                    self.dispatch_and_record(&response).await;
                    return;
                }
                previous_tool_call = extract_tool_calls_block(&response).map(str::to_string);
                self.log_similarity(&similar_groups, false, "held back for revision");
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

    fn log_similarity(
        &self,
        groups: &[(String, Vec<(String, f32)>)],
        proceeded: bool,
        explanation: &str,
    ) {
        for (question, close) in groups {
            let (contents, scores): (Vec<String>, Vec<f32>) = close.iter().cloned().unzip();
            self.ctx.eval.log_question_similarity(
                self.core.name(),
                question,
                &contents,
                &scores,
                proceeded,
                explanation,
            );
        }
    }

    /// Dispatch the response's tool calls, recording each outcome (and any
    /// recall result) as events. Parse failures are recorded, never raised.
    async fn dispatch_and_record(&self, response: &str) {
        match dispatch_tool_calls(&self.registry, response).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    let rendered = match &outcome.result {
                        Ok(output) => output.output.clone(),
                        Err(err) => format!("tool error: {err}"),
                    };
                    let tag = if outcome.call.name == "recall" {
                        "recall_response"
                    } else {
                        outcome.call.name.as_str()
                    };
                    let sender = if outcome.call.name == "recall" {
                        self.core.name().to_string()
                    } else {
                        "system".to_string()
                    };
                    self.core.add_event(sender, tag, rendered).await;
                }
            }
            Err(ToolCallError::NoToolCalls) => {}
            Err(err) => {
                self.core
                    .add_event("system", "error", format!("tool call parse failure: {err}"))
                    .await;
            }
        }
    }

    /// Split the matching events into (previous window, last Q/A pair).
    async fn split_current_qa(&self, filters: &[EventFilter]) -> (String, String) {
        let events = self.core.events_rendered_all(filters).await;
        let split_at = events.len().saturating_sub(2);
        let (previous, current) = events.split_at(split_at);
        let mut previous = previous.to_vec();
        if previous.len() > self.core.max_events_len {
            previous.drain(..previous.len() - self.core.max_events_len);
        }
        (previous.join("\n"), current.join("\n"))
    }
}

#[async_trait]
impl Subscriber for SessionScribe {
    fn name(&self) -> &str {
        self.core.name()
    }

    async fn on_message(&self, message: Message) {
        debug!(role = %message.role, "scribe received message");
        match message.role {
            Role::Interviewer => {
                *self.last_interviewer_message.lock().await = Some(message);
            }
            Role::User => {
                let interviewer = self.last_interviewer_message.lock().await.take();
                let (Some(interviewer), Some(scribe)) = (interviewer, self.weak.upgrade()) else {
                    return;
                };
                // Track the task before it is spawned so
                // `processing_in_progress` is already true when the engine
                // polls right after this message.
                self.pending_tasks.send_modify(|count| *count += 1);
                tokio::spawn(async move {
                    scribe.process_qa_pair(interviewer, message).await;
                });
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_context, test_context_with_config};
    use memoir_config::AppConfig;
    use memoir_llm::ScriptedEngine;

    fn qa(interviewer: &str, user: &str) -> (Message, Message) {
        (
            Message::conversation(Role::Interviewer, interviewer),
            Message::conversation(Role::User, user),
        )
    }

    const MEMORY_RESPONSE: &str = r#"<tool_calls>
  <update_memory_bank>
    <title>Grew up in Boston</title>
    <text>The user grew up in Boston's South End.</text>
    <importance>7</importance>
    <temp_id>TEMP_1</temp_id>
  </update_memory_bank>
  <update_memory_bank>
    <title>Family corner store</title>
    <text>The user's family ran a corner store.</text>
    <importance>6</importance>
    <temp_id>TEMP_2</temp_id>
  </update_memory_bank>
  <add_historical_question>
    <question>Where did you grow up?</question>
    <memory_ids>TEMP_1, TEMP_2</memory_ids>
  </add_historical_question>
</tool_calls>"#;

    #[tokio::test]
    async fn memory_pipeline_mints_memories_and_links_question() {
        // Baseline mode keeps the notes pipeline quiet so the scripted
        // responses line up deterministically.
        let mut config = AppConfig::default();
        config.session.use_baseline_prompt = true;
        let engine = Arc::new(ScriptedEngine::new([MEMORY_RESPONSE]));
        let ctx = test_context_with_config(engine, config).await;
        let scribe = SessionScribe::new(ctx.clone());

        let (iv, user) = qa("Where did you grow up?", "In Boston, above our corner store.");
        scribe.on_message(iv).await;
        scribe.on_message(user).await;

        let memories = scribe.get_session_memories(true, false, true).await;
        assert_eq!(memories.len(), 2);
        assert_eq!(memories[0].title, "Grew up in Boston");
        assert_eq!(
            memories[0].source_quote,
            "In Boston, above our corner store."
        );

        let bank = ctx.memory_bank.read().await;
        assert_eq!(bank.len(), 2);

        let historical = ctx.historical_questions.read().await;
        assert_eq!(historical.len(), 1);
        let record = &historical.all()[0];
        assert_eq!(record.content, "Where did you grow up?");
        // Temp ids were bound to the real minted ids.
        let real_ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
        assert_eq!(record.answered_by, real_ids);
    }

    #[tokio::test]
    async fn drain_clears_unprocessed_but_keeps_cumulative() {
        let mut config = AppConfig::default();
        config.session.use_baseline_prompt = true;
        let engine = Arc::new(ScriptedEngine::new([MEMORY_RESPONSE]));
        let ctx = test_context_with_config(engine, config).await;
        let scribe = SessionScribe::new(ctx.clone());

        let (iv, user) = qa("Where did you grow up?", "Boston.");
        scribe.on_message(iv).await;
        scribe.on_message(user).await;

        let drained = scribe.get_session_memories(false, true, true).await;
        assert_eq!(drained.len(), 2);
        assert_eq!(scribe.unprocessed_count(), 0);
        assert!(!scribe.processing_in_progress());

        // The cumulative set survives the drain.
        let all = scribe.get_session_memories(true, false, false).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn notes_pipeline_adds_note_and_followup() {
        let engine = Arc::new(ScriptedEngine::new([
            // Agenda note update.
            "<tool_calls><update_session_agenda><question_id>3</question_id><note>Grew up in Boston</note></update_session_agenda></tool_calls>".to_string(),
            // Follow-up proposal, nothing similar in the banks.
            "<tool_calls><add_interview_question><topic>Personal</topic><question>What was the corner store like?</question><question_id>3.1</question_id></add_interview_question></tool_calls>".to_string(),
        ]));
        let ctx = test_context(engine).await;
        let scribe = SessionScribe::new(ctx.clone());

        let (iv, user) = qa("Where did you grow up?", "In Boston.");
        scribe.notes_pipeline(&iv, &user).await;

        let agenda = ctx.agenda.lock().await;
        assert_eq!(
            agenda.find_question("3").unwrap().notes,
            vec!["Grew up in Boston".to_string()]
        );
        assert_eq!(
            agenda.find_question("3.1").unwrap().text,
            "What was the corner store like?"
        );
        drop(agenda);

        let proposed = ctx.proposed_questions.read().await;
        assert_eq!(proposed.len(), 1);
        assert_eq!(proposed.all()[0].content, "What was the corner store like?");
    }

    #[tokio::test]
    async fn similar_question_loop_honors_proceed() {
        let proposal = "<tool_calls><add_interview_question><topic>Education</topic><question>What did you study in college?</question><question_id>5</question_id></add_interview_question></tool_calls>";
        let mut config = AppConfig::default();
        // The hash embedder gives modest cosine overlap for related
        // questions; lower the bar so the near-duplicate check fires.
        config.bank.similarity_threshold = 0.3;
        let engine = Arc::new(ScriptedEngine::new([
            proposal.to_string(),
            format!("I still want to ask this.\n<proceed>true</proceed>\n{proposal}"),
        ]));
        let ctx = test_context_with_config(engine.clone(), config).await;
        // Give the top-level ids 1..4 so "5" is sequential (seed agenda has
        // four questions), and seed the proposed bank with the near-twin.
        ctx.proposed_questions
            .write()
            .await
            .add_question("Where did you go to college?", "SessionScribe");

        let scribe = SessionScribe::new(ctx.clone());
        scribe.propose_followups().await;

        // Two engine rounds: held back, then proceed.
        assert_eq!(engine.recorded_prompts().await.len(), 2);
        assert!(engine.recorded_prompts().await[1].contains("similar_questions_warning"));

        let agenda = ctx.agenda.lock().await;
        assert_eq!(
            agenda.find_question("5").unwrap().text,
            "What did you study in college?"
        );
        drop(agenda);

        let proposed = ctx.proposed_questions.read().await;
        let contents: Vec<&str> = proposed.all().iter().map(|q| q.content.as_str()).collect();
        assert!(contents.contains(&"Where did you go to college?"));
        assert!(contents.contains(&"What did you study in college?"));
        assert!(ctx.historical_questions.read().await.is_empty());
    }

    #[tokio::test]
    async fn processing_flag_tracks_pending_tasks() {
        let mut config = AppConfig::default();
        config.session.use_baseline_prompt = true;
        let engine = Arc::new(ScriptedEngine::new([MEMORY_RESPONSE]));
        let ctx = test_context_with_config(engine, config).await;
        let scribe = SessionScribe::new(ctx);

        assert!(!scribe.processing_in_progress());
        let (iv, user) = qa("q", "a");
        scribe.on_message(iv).await;
        scribe.on_message(user).await;
        assert!(scribe.processing_in_progress());

        let _ = scribe.get_session_memories(false, false, true).await;
        assert!(!scribe.processing_in_progress());
    }
}
