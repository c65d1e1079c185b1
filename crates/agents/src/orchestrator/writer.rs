//! Section writers: one worker per accepted plan, running in parallel and
//! sharing the biography through its write guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use memoir_biography::{Biography, BiographyError, SectionRef};
use memoir_core::EventFilter;
use memoir_prompt::biography_team::{SectionWriterArgs, section_writer as writer_prompt};
use memoir_tools::{
    Tool, ToolCallError, ToolOutput, ToolParam, ToolSpec, ToolRegistry, dispatch_tool_calls,
};

use crate::SessionContext;
use crate::base::AgentCore;
use crate::tools::RecallTool;

use super::planner::Plan;

/// A gap in the biography that the next session should ask about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpQuestion {
    pub content: String,
    pub context: String,
}

pub(crate) type FollowUpSink = Arc<StdMutex<Vec<FollowUpQuestion>>>;

/// Result of executing one plan.
#[derive(Debug)]
pub(crate) struct WriteOutcome {
    pub success: bool,
    pub message: String,
    /// Set when the write was rejected by a tree invariant. The
    /// orchestrator hands these back to the planner for one revision pass.
    pub needs_replan: bool,
}

// ── Tools ────────────────────────────────────────────────────────────────────

struct AddSectionTool {
    biography: Arc<Biography>,
}

#[async_trait]
impl Tool for AddSectionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_section".to_string(),
            description: "Create a new biography section at a slash path.".to_string(),
            params: vec![
                ToolParam {
                    name: "path".to_string(),
                    description: "full path, e.g. '1 Early Life/1.1 Childhood'".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "content".to_string(),
                    description: "section prose with [MEM_...] citations".to_string(),
                    required: true,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let path = args.get("path").ok_or_else(|| anyhow!("missing path"))?;
        let content = args.get("content").map(String::as_str).unwrap_or_default();
        let section = self.biography.add_section(path, content).await?;
        Ok(ToolOutput::ok(format!("created section {}", section.title)))
    }
}

struct UpdateSectionTool {
    biography: Arc<Biography>,
}

#[async_trait]
impl Tool for UpdateSectionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "update_section".to_string(),
            description: "Update the content and/or title of an existing section.".to_string(),
            params: vec![
                ToolParam {
                    name: "path".to_string(),
                    description: "full path of the section".to_string(),
                    required: false,
                },
                ToolParam {
                    name: "title".to_string(),
                    description: "exact title, when no path is given".to_string(),
                    required: false,
                },
                ToolParam {
                    name: "content".to_string(),
                    description: "replacement prose with [MEM_...] citations".to_string(),
                    required: false,
                },
                ToolParam {
                    name: "new_title".to_string(),
                    description: "replacement title".to_string(),
                    required: false,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let path = args.get("path").map(String::as_str).filter(|p| !p.is_empty());
        let title = args.get("title").map(String::as_str).filter(|t| !t.is_empty());

        // A path/title pair must agree; the path wins once checked.
        if let (Some(path), Some(title)) = (path, title) {
            let last = path.rsplit('/').next().unwrap_or(path);
            if last != title {
                return Err(anyhow!(BiographyError::ConflictingLocator {
                    path: path.to_string(),
                    title: title.to_string(),
                }));
            }
        }
        let locator = match (path, title) {
            (Some(path), _) => SectionRef::Path(path),
            (None, Some(title)) => SectionRef::Title(title),
            (None, None) => return Err(anyhow!("update_section needs a path or a title")),
        };

        let section = self
            .biography
            .update_section(
                locator,
                args.get("content").map(String::as_str),
                args.get("new_title").map(String::as_str),
            )
            .await?;
        Ok(ToolOutput::ok(format!("updated section {}", section.title)))
    }
}

struct ProposeFollowUpTool {
    sink: FollowUpSink,
}

#[async_trait]
impl Tool for ProposeFollowUpTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "propose_follow_up".to_string(),
            description: "Note a question the next session should ask to fill a biography gap.".to_string(),
            params: vec![
                ToolParam {
                    name: "content".to_string(),
                    description: "the question".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "context".to_string(),
                    description: "why this information is needed".to_string(),
                    required: true,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let content = args
            .get("content")
            .ok_or_else(|| anyhow!("missing content"))?
            .trim()
            .to_string();
        let context = args.get("context").cloned().unwrap_or_default();
        self.sink
            .lock()
            .expect("follow-up sink poisoned")
            .push(FollowUpQuestion {
                content: content.clone(),
                context,
            });
        Ok(ToolOutput::ok(format!("noted follow-up: {content}")))
    }
}

// ── The worker ───────────────────────────────────────────────────────────────

pub(crate) struct SectionWriter {
    ctx: Arc<SessionContext>,
    core: AgentCore,
    registry: ToolRegistry,
}

impl SectionWriter {
    pub fn new(ctx: Arc<SessionContext>, follow_ups: FollowUpSink) -> Self {
        let core = AgentCore::new("SectionWriter", ctx.engine.clone(), &ctx.config);
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(AddSectionTool {
            biography: ctx.biography.clone(),
        }));
        registry.register(Box::new(UpdateSectionTool {
            biography: ctx.biography.clone(),
        }));
        registry.register(Box::new(ProposeFollowUpTool { sink: follow_ups }));
        registry.register(Box::new(RecallTool::new(ctx.memory_bank.clone())));
        Self { ctx, core, registry }
    }

    /// Execute one plan: a bounded loop of optional recalls followed by the
    /// section write.
    pub async fn execute(&self, plan: &Plan) -> WriteOutcome {
        for iteration in 0..self.core.max_consideration_iterations {
            let prompt = self.build_prompt(plan).await;
            self.core
                .add_event(self.core.name(), format!("section_write_prompt_{iteration}"), &prompt)
                .await;

            let response = match self.core.call_engine(&prompt).await {
                Ok(response) => response,
                Err(err) => {
                    return WriteOutcome {
                        success: false,
                        message: format!("engine failure: {err}"),
                        needs_replan: false,
                    };
                }
            };
            self.core
                .add_event(self.core.name(), format!("section_write_response_{iteration}"), &response)
                .await;

            let outcomes = match dispatch_tool_calls(&self.registry, &response).await {
                Ok(outcomes) => outcomes,
                Err(ToolCallError::NoToolCalls) => {
                    // Nothing actionable; ask again within the bound.
                    continue;
                }
                Err(err) => {
                    self.core
                        .add_event("system", "error", format!("parse failure: {err}"))
                        .await;
                    continue;
                }
            };

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
                    name @ ("add_section" | "update_section") => {
                        match &outcome.result {
                            Ok(_) => {
                                return WriteOutcome {
                                    success: true,
                                    message: format!("{name} for {} applied", plan.target()),
                                    needs_replan: false,
                                };
                            }
                            Err(err) => {
                                // Tree invariants rejected the write; the
                                // planner gets a chance to revise.
                                self.core
                                    .add_event("system", "error", format!("{name} rejected: {err}"))
                                    .await;
                                return WriteOutcome {
                                    success: false,
                                    message: err.to_string(),
                                    needs_replan: true,
                                };
                            }
                        }
                    }
                    _ => {
                        self.core
                            .add_event("system", &outcome.call.name, rendered)
                            .await;
                    }
                }
            }

            if !recalled {
                // A response with neither a recall nor a write is a no-op;
                // loop with the bound.
                continue;
            }
        }

        WriteOutcome {
            success: false,
            message: "max iterations reached when updating section".to_string(),
            needs_replan: false,
        }
    }

    async fn build_prompt(&self, plan: &Plan) -> String {
        let section_identifier = match (&plan.path, &plan.title) {
            (Some(path), _) => format!("<section_path>{path}</section_path>"),
            (None, Some(title)) => format!("<section_title>{title}</section_title>"),
            (None, None) => "<section_path></section_path>".to_string(),
        };

        let current_content = {
            let locator = match (&plan.path, &plan.title) {
                (Some(path), _) => Some(SectionRef::Path(path.as_str())),
                (None, Some(title)) => Some(SectionRef::Title(title.as_str())),
                (None, None) => None,
            };
            locator
                .and_then(|locator| self.ctx.biography.get_section(locator, false).ok().flatten())
                .map(|section| section.content)
                .unwrap_or_default()
        };

        let relevant_memories = self
            .ctx
            .memory_bank
            .read()
            .await
            .format_for_prompt(&plan.memory_ids, true);
        let event_stream = self
            .core
            .events_rendered(&[EventFilter::sender_and_tag(self.core.name(), "recall_response")])
            .await
            .join("\n");

        writer_prompt(&SectionWriterArgs {
            section_identifier: &section_identifier,
            update_plan: &plan.update_plan,
            current_content: &current_content,
            relevant_memories: &relevant_memories,
            event_stream: &event_stream,
            tool_descriptions: &self.registry.describe(&[
                "recall",
                "add_section",
                "update_section",
                "propose_follow_up",
            ]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use memoir_biography::paths::PlanAction;
    use memoir_llm::ScriptedEngine;

    fn create_plan(path: &str) -> Plan {
        Plan {
            action: PlanAction::Create,
            path: Some(path.to_string()),
            title: None,
            new_title: None,
            update_plan: "write it".to_string(),
            memory_ids: vec![],
        }
    }

    #[tokio::test]
    async fn writer_applies_an_add_section_call() {
        let engine = Arc::new(ScriptedEngine::new([
            "<tool_calls><add_section><path>1 Early Life</path><content>Born in Boston [MEM_a].</content></add_section></tool_calls>",
        ]));
        let ctx = test_context(engine).await;
        let writer = SectionWriter::new(ctx.clone(), Arc::default());

        let outcome = writer.execute(&create_plan("1 Early Life")).await;
        assert!(outcome.success, "{}", outcome.message);

        let section = ctx
            .biography
            .get_section(SectionRef::Path("1 Early Life"), false)
            .unwrap()
            .unwrap();
        assert_eq!(section.memory_ids, vec!["MEM_a".to_string()]);
    }

    #[tokio::test]
    async fn writer_recalls_then_writes() {
        let engine = Arc::new(ScriptedEngine::new([
            "<tool_calls><recall><query>childhood</query></recall></tool_calls>",
            "<tool_calls><add_section><path>1 Early Life</path><content>Content [MEM_b].</content></add_section></tool_calls>",
        ]));
        let ctx = test_context(engine.clone()).await;
        let writer = SectionWriter::new(ctx.clone(), Arc::default());

        let outcome = writer.execute(&create_plan("1 Early Life")).await;
        assert!(outcome.success);
        assert_eq!(engine.recorded_prompts().await.len(), 2);
    }

    #[tokio::test]
    async fn invariant_rejection_requests_replanning() {
        let engine = Arc::new(ScriptedEngine::new([
            "<tool_calls><add_section><path>3 Career</path><content>Too far ahead.</content></add_section></tool_calls>",
        ]));
        let ctx = test_context(engine).await;
        let writer = SectionWriter::new(ctx.clone(), Arc::default());

        let outcome = writer.execute(&create_plan("3 Career")).await;
        assert!(!outcome.success);
        assert!(outcome.needs_replan);
        assert!(outcome.message.contains("non-sequential"));
    }

    #[tokio::test]
    async fn follow_up_proposals_reach_the_sink() {
        let engine = Arc::new(ScriptedEngine::new([
            "<tool_calls><propose_follow_up><content>What year was that?</content><context>no date known</context></propose_follow_up><add_section><path>1 Early Life</path><content>x</content></add_section></tool_calls>",
        ]));
        let ctx = test_context(engine).await;
        let sink: FollowUpSink = Arc::default();
        let writer = SectionWriter::new(ctx, sink.clone());

        let outcome = writer.execute(&create_plan("1 Early Life")).await;
        assert!(outcome.success);
        let proposals = sink.lock().unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].content, "What year was that?");
    }
}
