//! Session scribe prompts: agenda note updates, follow-up proposal with the
//! similar-questions feedback loop, and memory/question bank updates.

use crate::format_prompt;

pub struct AgendaUpdateArgs<'a> {
    pub user_portrait: &'a str,
    pub previous_events: &'a str,
    pub current_qa: &'a str,
    pub questions_and_notes: &'a str,
    pub tool_descriptions: &'a str,
}

/// Prompt for updating agenda notes from the latest Q/A pair.
pub fn update_session_agenda(args: &AgendaUpdateArgs<'_>) -> String {
    format_prompt(UPDATE_AGENDA, &[
        ("user_portrait", args.user_portrait),
        ("previous_events", args.previous_events),
        ("current_qa", args.current_qa),
        ("questions_and_notes", args.questions_and_notes),
        ("tool_descriptions", args.tool_descriptions),
    ])
}

pub struct FollowUpArgs<'a> {
    pub user_portrait: &'a str,
    pub event_stream: &'a str,
    pub questions_and_notes: &'a str,
    pub similar_questions_warning: &'a str,
    pub tool_descriptions: &'a str,
}

/// Prompt for considering and proposing follow-up questions.
pub fn consider_and_propose_followups(args: &FollowUpArgs<'_>) -> String {
    format_prompt(PROPOSE_FOLLOWUPS, &[
        ("user_portrait", args.user_portrait),
        ("event_stream", args.event_stream),
        ("questions_and_notes", args.questions_and_notes),
        ("similar_questions_warning", args.similar_questions_warning),
        ("tool_descriptions", args.tool_descriptions),
    ])
}

pub struct MemoryUpdateArgs<'a> {
    pub user_portrait: &'a str,
    pub previous_events: &'a str,
    pub current_qa: &'a str,
    pub tool_descriptions: &'a str,
}

/// Prompt for minting memories and registering the asked question.
pub fn update_memory_question_bank(args: &MemoryUpdateArgs<'_>) -> String {
    format_prompt(UPDATE_MEMORY_BANK, &[
        ("user_portrait", args.user_portrait),
        ("previous_events", args.previous_events),
        ("current_qa", args.current_qa),
        ("tool_descriptions", args.tool_descriptions),
    ])
}

/// Render the warning block for near-duplicate follow-ups. `groups` pairs
/// each proposed question with its most similar bank entries and scores.
pub fn similar_questions_warning(
    previous_tool_call: &str,
    groups: &[(String, Vec<(String, f32)>)],
) -> String {
    let mut rendered = String::new();
    for (proposed, similar) in groups {
        rendered.push_str(&format!("<proposed>{proposed}</proposed>\n"));
        for (content, score) in similar {
            rendered.push_str(&format!(
                "  <similar score=\"{score:.2}\">{content}</similar>\n"
            ));
        }
    }
    format_prompt(SIMILAR_QUESTIONS_WARNING, &[
        ("previous_tool_call", previous_tool_call),
        ("similar_questions", rendered.trim_end()),
    ])
}

const UPDATE_AGENDA: &str = "\
You are the session scribe for a biographical interview. Record what the
user's latest answer tells us on the session agenda.

<user_portrait>
{user_portrait}
</user_portrait>

Earlier conversation:
<previous_events>
{previous_events}
</previous_events>

The question-and-answer exchange to record:
<current_qa>
{current_qa}
</current_qa>

Current agenda (answered questions are collapsed):
<questions_and_notes>
{questions_and_notes}
</questions_and_notes>

<tool_descriptions>
{tool_descriptions}
</tool_descriptions>

<instructions>
Attach one concise note per fact the user just shared, bound to the agenda
question it answers via its [ID]. Use a note without a question id only for
facts no listed question covers. Do not invent facts and do not restate the
question text inside the note.
Respond with a single <tool_calls> block of update_session_agenda calls.
</instructions>
";

const PROPOSE_FOLLOWUPS: &str = "\
You are the session scribe for a biographical interview. Decide whether the
latest exchange deserves follow-up questions in the agenda.

<user_portrait>
{user_portrait}
</user_portrait>

Recent exchanges and recall results:
<event_stream>
{event_stream}
</event_stream>

Current agenda:
<questions_and_notes>
{questions_and_notes}
</questions_and_notes>

{similar_questions_warning}

<tool_descriptions>
{tool_descriptions}
</tool_descriptions>

<instructions>
Propose at most two follow-up questions, each as an add_interview_question
call with a parent id when it deepens an existing thread. Prefer recall
first when you suspect the topic was already covered in past sessions. If
nothing is worth asking, respond with no tool calls.
</instructions>
";

pub const SIMILAR_QUESTIONS_WARNING: &str = "\
<similar_questions_warning>
Your previous proposal was held back because the question bank already
contains similar questions:

Previous tool call:
{previous_tool_call}

Similar questions found:
{similar_questions}

Either revise your proposal to ask something genuinely new, or include
<proceed>true</proceed> alongside the unchanged tool call if the overlap is
intentional and justified.
</similar_questions_warning>
";

const UPDATE_MEMORY_BANK: &str = "\
You are the session scribe maintaining the user's memory bank.

<user_portrait>
{user_portrait}
</user_portrait>

Earlier conversation:
<previous_events>
{previous_events}
</previous_events>

The exchange to process:
<current_qa>
{current_qa}
</current_qa>

<tool_descriptions>
{tool_descriptions}
</tool_descriptions>

<instructions>
Break the user's answer into atomic memories: one update_memory_bank call
per distinct fact or episode, with a short title, a self-contained summary,
an importance score from 1 to 10, and the temporary id TEMP_1, TEMP_2, … in
order. Then register the interviewer's question with one
add_historical_question call whose memory_ids lists the temporary ids of
the memories that answer it (comma-separated). If the answer contains
nothing biographical, make no calls.
</instructions>
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn followup_prompt_omits_warning_when_empty() {
        let args = FollowUpArgs {
            user_portrait: "Name: Ada",
            event_stream: "<User>\nhi\n</User>",
            questions_and_notes: "",
            similar_questions_warning: "",
            tool_descriptions: "",
        };
        let rendered = consider_and_propose_followups(&args);
        assert!(!rendered.contains("similar_questions_warning>"));
        assert!(rendered.contains("add_interview_question"));
    }

    #[test]
    fn memory_prompt_explains_temp_ids() {
        let args = MemoryUpdateArgs {
            user_portrait: "",
            previous_events: "",
            current_qa: "<User>\nI grew up in Boston\n</User>",
            tool_descriptions: "",
        };
        let rendered = update_memory_question_bank(&args);
        assert!(rendered.contains("TEMP_1"));
        assert!(rendered.contains("add_historical_question"));
    }
}
