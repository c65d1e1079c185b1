//! Interviewer prompts — normal (engagement-scoring) and baseline
//! (theme-picking) modes.

use crate::{PromptMode, format_prompt};

pub struct InterviewerPromptArgs<'a> {
    pub user_portrait: &'a str,
    pub last_meeting_summary: &'a str,
    pub chat_history: &'a str,
    pub current_events: &'a str,
    pub questions_and_notes: &'a str,
    /// The interviewer's own recent utterances, to discourage repetition.
    pub recent_utterances: &'a str,
    pub tool_descriptions: &'a str,
}

pub fn prompt(mode: PromptMode, args: &InterviewerPromptArgs<'_>) -> String {
    let instructions = match mode {
        PromptMode::Normal => NORMAL_INSTRUCTIONS,
        PromptMode::Baseline => BASELINE_INSTRUCTIONS,
    };
    let template = [PERSONA, SHARED_CONTEXT, instructions, TOOLING].concat();
    format_prompt(&template, &[
        ("user_portrait", args.user_portrait),
        ("last_meeting_summary", args.last_meeting_summary),
        ("chat_history", args.chat_history),
        ("current_events", args.current_events),
        ("questions_and_notes", args.questions_and_notes),
        ("recent_utterances", args.recent_utterances),
        ("tool_descriptions", args.tool_descriptions),
    ])
}

const PERSONA: &str = "\
<interviewer_persona>
You are a friendly and casual conversation partner, genuinely curious about
the user's life experiences and memories. You ask simple, concrete questions
about specific memories, avoiding abstract discussions unless the user
brings them up.
</interviewer_persona>

";

const SHARED_CONTEXT: &str = "\
Here is some general information that you know about the user:
<user_portrait>
{user_portrait}
</user_portrait>

Here is a summary of the last session with the user:
<last_meeting_summary>
{last_meeting_summary}
</last_meeting_summary>

Chat history of the current session:
<chat_history>
{chat_history}
</chat_history>

Focus on crafting a response to the user's latest message:
<current_events>
{current_events}
</current_events>

Your own recent utterances — do not repeat their phrasing or questions:
<recent_utterances>
{recent_utterances}
</recent_utterances>

";

const NORMAL_INSTRUCTIONS: &str = "\
<instructions>
Interview protocol:
1. Read the user's latest answer.
2. Score engagement from 1 to 5:
   * High (4-5): detailed stories, emotional language, unprompted elaboration.
   * Moderate (3): complete but minimal answers.
   * Low (1-2): terse replies, topic deflection, or an explicit skip.
3. For high engagement, stay on the current story and ask one deeper,
   concrete follow-up about it.
4. For moderate engagement, finish the current thread with at most one
   follow-up, then move along the agenda.
5. For low engagement or an explicit skip, switch to a very different topic
   from the agenda.
Ask one question at a time, keep it short, and never re-ask a question that
already shows as (Answered).

Tentative topics and questions for this session:
<questions_and_notes>
{questions_and_notes}
</questions_and_notes>
</instructions>

";

const BASELINE_INSTRUCTIONS: &str = "\
<instructions>
Select one of the following life narrative themes and ask one question
about it. Do not adapt to engagement signals; simply keep coverage balanced
across themes over the session:
1. Childhood and family origins
2. Education and formative experiences
3. Work and career
4. Relationships and community
5. Challenges and turning points
6. Beliefs, values, and identity
7. Hopes and plans for the future
Ask one question at a time and keep it short.
</instructions>

";

const TOOLING: &str = "\
To interact with the user and the memory bank you can use the following
tools:
<tool_descriptions>
{tool_descriptions}
</tool_descriptions>

Take exactly one action per turn, expressed as a single tool call:
- recall: search the memory bank before answering when the user refers to
  something from a past session;
- respond_to_user: say your next utterance to the user;
- end_conversation: close the session when the user clearly wants to stop.

<output_format>
Respond with a <tool_calls> block containing exactly one tool call, e.g.:
<tool_calls>
  <respond_to_user>
    <response>Your utterance here.</response>
  </respond_to_user>
</tool_calls>
</output_format>
";
