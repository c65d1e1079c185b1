//! End-of-session summary writer: refreshes the portrait and last-meeting
//! summary, then rebuilds the interview agenda for the next session.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use memoir_core::EventFilter;
use memoir_memory::Memory;
use memoir_prompt::biography_team as team_prompts;
use memoir_tools::{
    Tool, ToolCallError, ToolOutput, ToolParam, ToolSpec, ToolRegistry, dispatch_tool_calls,
};

use crate::SessionContext;
use crate::SharedAgenda;
use crate::base::AgentCore;
use crate::tools::RecallTool;

use super::writer::FollowUpQuestion;

struct UpdateLastMeetingSummaryTool {
    agenda: SharedAgenda,
}

#[async_trait]
impl Tool for UpdateLastMeetingSummaryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "update_last_meeting_summary".to_string(),
            description: "Replace the last-meeting summary shown at the next session's start.".to_string(),
            params: vec![ToolParam {
                name: "summary".to_string(),
                description: "a short paragraph about what was discussed".to_string(),
                required: true,
            }],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let summary = args.get("summary").ok_or_else(|| anyhow!("missing summary"))?;
        self.agenda.lock().await.set_last_meeting_summary(summary.trim());
        Ok(ToolOutput::ok("summary updated"))
    }
}

struct UpdateUserPortraitTool {
    agenda: SharedAgenda,
}

#[async_trait]
impl Tool for UpdateUserPortraitTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "update_user_portrait".to_string(),
            description: "Set one durable fact about the user (e.g. Name, Age, Occupation).".to_string(),
            params: vec![
                ToolParam {
                    name: "key".to_string(),
                    description: "the portrait field".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "value".to_string(),
                    description: "the fact".to_string(),
                    required: true,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let key = args.get("key").ok_or_else(|| anyhow!("missing key"))?;
        let value = args.get("value").ok_or_else(|| anyhow!("missing value"))?;
        self.agenda
            .lock()
            .await
            .set_portrait_field(key.trim(), value.trim());
        Ok(ToolOutput::ok(format!("portrait updated: {key}")))
    }
}

/// Agenda-only question tool. The rebuild runs after the session, with
/// no proposed-bank registration.
struct RebuildQuestionTool {
    agenda: SharedAgenda,
}

#[async_trait]
impl Tool for RebuildQuestionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_interview_question".to_string(),
            description: "Add one question to the next session's agenda.".to_string(),
            params: vec![
                ToolParam {
                    name: "topic".to_string(),
                    description: "topic category".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "question".to_string(),
                    description: "the question text".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "question_id".to_string(),
                    description: "dotted id with fresh sequential numbering".to_string(),
                    required: true,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let topic = args.get("topic").ok_or_else(|| anyhow!("missing topic"))?;
        let question = args.get("question").ok_or_else(|| anyhow!("missing question"))?;
        let question_id = args
            .get("question_id")
            .ok_or_else(|| anyhow!("missing question_id"))?;
        self.agenda
            .lock()
            .await
            .add_interview_question(topic, question, question_id.trim())
            .map_err(|err| anyhow!(err))?;
        Ok(ToolOutput::ok(format!("added question {question_id}")))
    }
}

struct DeleteQuestionTool {
    agenda: SharedAgenda,
}

#[async_trait]
impl Tool for DeleteQuestionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "delete_interview_question".to_string(),
            description: "Remove a question that is no longer worth asking.".to_string(),
            params: vec![ToolParam {
                name: "question_id".to_string(),
                description: "the question's dotted id".to_string(),
                required: true,
            }],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let question_id = args
            .get("question_id")
            .ok_or_else(|| anyhow!("missing question_id"))?;
        self.agenda
            .lock()
            .await
            .delete_interview_question(question_id.trim())
            .map_err(|err| anyhow!(err))?;
        Ok(ToolOutput::ok(format!("deleted question {question_id}")))
    }
}

pub(crate) struct SessionSummaryWriter {
    ctx: Arc<SessionContext>,
    core: AgentCore,
    registry: ToolRegistry,
}

impl SessionSummaryWriter {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        let core = AgentCore::new("SessionSummaryWriter", ctx.engine.clone(), &ctx.config);
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(UpdateLastMeetingSummaryTool {
            agenda: ctx.agenda.clone(),
        }));
        registry.register(Box::new(UpdateUserPortraitTool {
            agenda: ctx.agenda.clone(),
        }));
        registry.register(Box::new(RebuildQuestionTool {
            agenda: ctx.agenda.clone(),
        }));
        registry.register(Box::new(DeleteQuestionTool {
            agenda: ctx.agenda.clone(),
        }));
        registry.register(Box::new(RecallTool::new(ctx.memory_bank.clone())));
        Self { ctx, core, registry }
    }

    /// The whole rewrite: summary + portrait first, then the question
    /// rebuild against a cleared agenda.
    pub async fn rewrite_agenda(
        &self,
        session_memories: &[Memory],
        follow_ups: &[FollowUpQuestion],
        selected_topics: &[String],
    ) -> Result<()> {
        self.update_summary_and_portrait(session_memories).await?;
        self.rebuild_questions(follow_ups, selected_topics).await
    }

    async fn update_summary_and_portrait(&self, session_memories: &[Memory]) -> Result<()> {
        let new_memories = session_memories
            .iter()
            .map(|memory| format!("- {}", memory.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = team_prompts::session_summary(&team_prompts::SessionSummaryArgs {
            new_memories: &new_memories,
            user_portrait: &self.ctx.portrait_str().await,
            tool_descriptions: &self
                .registry
                .describe(&["update_last_meeting_summary", "update_user_portrait"]),
        });
        self.core
            .add_event(self.core.name(), "summary_prompt", &prompt)
            .await;

        let response = self.core.call_engine(&prompt).await?;
        self.core
            .add_event(self.core.name(), "summary_response", &response)
            .await;
        self.dispatch_recording(&response).await;
        Ok(())
    }

    /// Clear all questions, then bounded loop: recall or rebuild.
    async fn rebuild_questions(
        &self,
        follow_ups: &[FollowUpQuestion],
        selected_topics: &[String],
    ) -> Result<()> {
        let old_questions_and_notes = {
            let mut agenda = self.ctx.agenda.lock().await;
            let old = agenda.get_questions_and_notes_str(false);
            agenda.clear_questions();
            old
        };

        let follow_up_block = follow_ups
            .iter()
            .map(|question| {
                format!(
                    "<question>\n<content>{}</content>\n<context>{}</context>\n</question>",
                    question.content, question.context
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        for iteration in 0..self.core.max_consideration_iterations {
            let event_stream = self
                .core
                .events_tail(
                    &[EventFilter::sender_and_tag(self.core.name(), "recall_response")],
                    10,
                )
                .await
                .join("\n");
            let prompt = team_prompts::interview_questions(&team_prompts::InterviewQuestionsArgs {
                old_questions_and_notes: &old_questions_and_notes,
                follow_up_questions: &follow_up_block,
                selected_topics: &selected_topics.join("\n"),
                event_stream: &event_stream,
                tool_descriptions: &self
                    .registry
                    .describe(&["recall", "add_interview_question"]),
            });
            self.core
                .add_event(self.core.name(), format!("questions_prompt_{iteration}"), &prompt)
                .await;

            let response = self.core.call_engine(&prompt).await?;
            self.core
                .add_event(self.core.name(), format!("questions_response_{iteration}"), &response)
                .await;

            let is_recall_only =
                response.contains("<recall>") && !response.contains("<add_interview_question>");
            self.dispatch_recording(&response).await;
            if !is_recall_only {
                self.core
                    .add_event(
                        self.core.name(),
                        "question_actions",
                        "rebuilt the interview question list",
                    )
                    .await;
                return Ok(());
            }
        }

        self.core
            .add_event(
                "system",
                "warning",
                format!(
                    "reached maximum iterations ({}) without rebuilding questions",
                    self.core.max_consideration_iterations
                ),
            )
            .await;
        Ok(())
    }

    /// Main topics covered this session, one per line from the model.
    /// Offered to the operator when no topics were selected.
    pub async fn extract_session_topics(&self, session_memories: &[Memory]) -> Vec<String> {
        if session_memories.is_empty() {
            return Vec::new();
        }
        let memories_text = session_memories
            .iter()
            .map(|memory| memory.to_prompt_xml(true))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = team_prompts::topic_extraction(&memories_text);
        self.core
            .add_event(self.core.name(), "topic_extraction_prompt", &prompt)
            .await;

        let Ok(response) = self.core.call_engine(&prompt).await else {
            return Vec::new();
        };
        self.core
            .add_event(self.core.name(), "topic_extraction_response", &response)
            .await;

        response
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    async fn dispatch_recording(&self, response: &str) {
        match dispatch_tool_calls(&self.registry, response).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    let rendered = match &outcome.result {
                        Ok(output) => output.output.clone(),
                        Err(err) => format!("tool error: {err}"),
                    };
                    if outcome.call.name == "recall" {
                        self.core
                            .add_event(self.core.name(), "recall_response", rendered)
                            .await;
                    } else {
                        self.core
                            .add_event("system", outcome.call.name.as_str(), rendered)
                            .await;
                    }
                }
            }
            Err(ToolCallError::NoToolCalls) => {}
            Err(err) => {
                self.core
                    .add_event("system", "error", format!("parse failure: {err}"))
                    .await;
            }
        }
    }
}
