//! Prompt templates for every agent, plus the `{placeholder}` substitution
//! helper they share.
//!
//! Templates are plain string constants; agents collect their context
//! blocks (portrait, event stream, tool descriptions, …) and substitute
//! them in one pass. Placeholders that receive no value are left verbatim
//! so a forgotten binding is visible in logs instead of silently vanishing.

pub mod biography_team;
pub mod interviewer;
pub mod scribe;
pub mod user;

/// Which interviewer protocol is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Engagement-scoring protocol with adaptive topic handling.
    Normal,
    /// Fixed life-narrative-theme protocol without adaptive heuristics.
    Baseline,
}

/// Substitute `{key}` placeholders. Keys absent from `values` stay as-is.
pub fn format_prompt(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_all_occurrences() {
        let out = format_prompt("{name} meets {name} about {topic}", &[
            ("name", "Ada"),
            ("topic", "engines"),
        ]);
        assert_eq!(out, "Ada meets Ada about engines");
    }

    #[test]
    fn unbound_placeholders_stay_visible() {
        let out = format_prompt("hello {missing}", &[("other", "x")]);
        assert_eq!(out, "hello {missing}");
    }

    #[test]
    fn interviewer_templates_bind_core_blocks() {
        let args = interviewer::InterviewerPromptArgs {
            user_portrait: "Name: Ada",
            last_meeting_summary: "First meeting.",
            chat_history: "(empty)",
            current_events: "(empty)",
            questions_and_notes: "[ID] 1: Where did you grow up?",
            recent_utterances: "(none)",
            tool_descriptions: "<tool name=\"recall\"></tool>",
        };

        let normal = interviewer::prompt(PromptMode::Normal, &args);
        assert!(normal.contains("Name: Ada"));
        assert!(normal.contains("Where did you grow up?"));
        assert!(normal.contains("engagement"));
        assert!(!normal.contains("{user_portrait}"));

        let baseline = interviewer::prompt(PromptMode::Baseline, &args);
        assert!(baseline.contains("life narrative themes"));
        assert!(!baseline.contains("{chat_history}"));
    }

    #[test]
    fn similar_questions_warning_lists_candidates() {
        let warning = scribe::similar_questions_warning(
            "<tool_calls>…</tool_calls>",
            &[(
                "What did you study in college?".to_string(),
                vec![("Where did you go to college?".to_string(), 0.91)],
            )],
        );
        assert!(warning.contains("What did you study in college?"));
        assert!(warning.contains("0.91"));
        assert!(warning.contains("<proceed>true</proceed>"));
    }
}
