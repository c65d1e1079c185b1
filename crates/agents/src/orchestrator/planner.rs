//! The planner: turns a batch of new memories into validated section plans.

use std::sync::Arc;

use tracing::{debug, warn};

use memoir_biography::paths::{PlanAction, validate_plan_target};
use memoir_memory::Memory;
use memoir_prompt::biography_team::{PlannerArgs, planner as planner_prompt};
use memoir_tools::{ToolCall, parse_tool_calls};

use crate::SessionContext;
use crate::base::AgentCore;

/// One orchestrator instruction: create, update, or retitle a section.
#[derive(Debug, Clone)]
pub struct Plan {
    pub action: PlanAction,
    pub path: Option<String>,
    pub title: Option<String>,
    pub new_title: Option<String>,
    pub update_plan: String,
    pub memory_ids: Vec<String>,
}

impl Plan {
    /// Display label for logs and re-prompt feedback.
    pub fn target(&self) -> &str {
        self.path
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("(no target)")
    }
}

pub(crate) struct Planner {
    ctx: Arc<SessionContext>,
    core: AgentCore,
}

/// The tool name planners use to emit plans. The planner owns no real
/// tools; its calls are parsed, validated, and dispatched as writer work.
const ADD_PLAN: &str = "add_plan";

const PLANNER_TOOL_DESCRIPTIONS: &str = "\
<tool name=\"add_plan\">
  <description>Queue one section change for the writers.</description>
  <param name=\"action\" required=\"true\">create | update | title_update</param>
  <param name=\"path\" required=\"false\">full slash path of the section</param>
  <param name=\"title\" required=\"false\">exact title, for update/title_update</param>
  <param name=\"new_title\" required=\"false\">replacement title, for title_update</param>
  <param name=\"update_plan\" required=\"true\">what the writer should change</param>
  <param name=\"memory_ids\" required=\"false\">comma-separated new memory ids</param>
</tool>";

impl Planner {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        let core = AgentCore::new("BiographyPlanner", ctx.engine.clone(), &ctx.config);
        Self { ctx, core }
    }

    /// Bounded plan/validate loop. Invalid plans are rejected with their
    /// structured errors and the planner is re-prompted; accepted plans
    /// accumulate across rounds (deduplicated by target).
    pub async fn plan(&self, memories: &[Memory], conversation_summary: &str) -> Vec<Plan> {
        let new_memories = memories
            .iter()
            .map(|memory| memory.to_prompt_xml(false))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut accepted: Vec<Plan> = Vec::new();
        let mut feedback = String::new();

        for iteration in 0..self.core.max_consideration_iterations {
            let prompt = planner_prompt(&PlannerArgs {
                new_memories: &new_memories,
                conversation_summary,
                sections_overview: &self.ctx.biography.sections_overview(),
                validation_feedback: &feedback,
                tool_descriptions: PLANNER_TOOL_DESCRIPTIONS,
            });
            self.core
                .add_event(self.core.name(), format!("plan_prompt_{iteration}"), &prompt)
                .await;

            let Ok(response) = self.core.call_engine(&prompt).await else {
                warn!("planner engine call failed");
                return accepted;
            };
            self.core
                .add_event(self.core.name(), format!("plan_response_{iteration}"), &response)
                .await;

            let calls = match parse_tool_calls(&response) {
                Ok(calls) => calls,
                Err(err) => {
                    feedback = format!(
                        "<validation_feedback>\nYour previous response could not be parsed ({err}). Respond with add_plan tool calls only.\n</validation_feedback>"
                    );
                    continue;
                }
            };

            let outline = self.ctx.biography.outline();
            let mut errors = Vec::new();
            for call in calls.iter().filter(|call| call.name == ADD_PLAN) {
                match parse_plan(call) {
                    Ok(plan) => {
                        let verdict = validate_plan_target(
                            &outline,
                            plan.action,
                            plan.path.as_deref(),
                            plan.title.as_deref(),
                        );
                        match verdict {
                            Ok(()) => {
                                if !accepted
                                    .iter()
                                    .any(|existing| existing.target() == plan.target())
                                {
                                    debug!(target = plan.target(), "plan accepted");
                                    accepted.push(plan);
                                }
                            }
                            Err(err) => {
                                errors.push(format!("plan for {}: {err}", plan.target()))
                            }
                        }
                    }
                    Err(reason) => errors.push(reason),
                }
            }

            if errors.is_empty() {
                return accepted;
            }
            self.core
                .add_event("system", "plan_validation_errors", errors.join("\n"))
                .await;
            feedback = format!(
                "<validation_feedback>\nThese plans were rejected; fix them and resubmit only the corrected plans:\n{}\n</validation_feedback>",
                errors.join("\n")
            );
        }

        warn!("planner exhausted its revision budget; proceeding with accepted plans");
        accepted
    }

    /// One extra planning pass over plans whose writes failed an invariant
    /// check (the writing → planning transition).
    pub async fn replan(&self, failures: &[(Plan, String)], conversation_summary: &str) -> Vec<Plan> {
        if failures.is_empty() {
            return Vec::new();
        }
        let description = failures
            .iter()
            .map(|(plan, error)| format!("plan for {}: {error}", plan.target()))
            .collect::<Vec<_>>()
            .join("\n");
        self.core
            .add_event("system", "replan_request", &description)
            .await;

        // Reuse the bounded loop with the failure description as feedback
        // and no new memories beyond the failed plans' citations.
        let memories: Vec<Memory> = Vec::new();
        let summary = format!("{conversation_summary}\n\nPrevious write failures:\n{description}");
        self.plan(&memories, &summary).await
    }
}

fn parse_plan(call: &ToolCall) -> Result<Plan, String> {
    let action = match call.arg("action").unwrap_or_default() {
        "create" => PlanAction::Create,
        "update" => PlanAction::Update,
        "title_update" | "title-update" => PlanAction::TitleUpdate,
        other => return Err(format!("unknown plan action: {other:?}")),
    };
    let path = call
        .arg("path")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let title = call
        .arg("title")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let new_title = call
        .arg("new_title")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let update_plan = call.arg("update_plan").unwrap_or_default().to_string();
    let memory_ids = call
        .arg("memory_ids")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(Plan {
        action,
        path,
        title,
        new_title,
        update_plan,
        memory_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plan_reads_all_fields() {
        let call = ToolCall::new("add_plan")
            .with_arg("action", "create")
            .with_arg("path", "1 Early Life")
            .with_arg("update_plan", "Start the early life section.")
            .with_arg("memory_ids", "MEM_a, MEM_b");
        let plan = parse_plan(&call).unwrap();
        assert_eq!(plan.action, PlanAction::Create);
        assert_eq!(plan.path.as_deref(), Some("1 Early Life"));
        assert_eq!(plan.memory_ids, vec!["MEM_a".to_string(), "MEM_b".to_string()]);
    }

    #[test]
    fn parse_plan_rejects_unknown_action() {
        let call = ToolCall::new("add_plan").with_arg("action", "destroy");
        assert!(parse_plan(&call).is_err());
    }
}
