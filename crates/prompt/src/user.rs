//! Persona prompt for the simulated user channel (`--user-agent` runs).

use crate::format_prompt;

pub struct SimulatedUserArgs<'a> {
    pub persona: &'a str,
    pub chat_history: &'a str,
    pub interviewer_question: &'a str,
}

pub fn simulated_user(args: &SimulatedUserArgs<'_>) -> String {
    format_prompt(SIMULATED_USER, &[
        ("persona", args.persona),
        ("chat_history", args.chat_history),
        ("interviewer_question", args.interviewer_question),
    ])
}

pub const DEFAULT_PERSONA: &str = "\
You are a 72-year-old retired schoolteacher from Boston. You grew up in the
South End, studied education at a state college, taught middle school for
four decades, raised two children, and like telling small concrete stories
about ordinary days. You answer warmly in two to four sentences and
occasionally mention you'd rather skip a topic.";

const SIMULATED_USER: &str = "\
<persona>
{persona}
</persona>

You are being interviewed about your life. Here is the conversation so far:
<chat_history>
{chat_history}
</chat_history>

The interviewer just asked:
<question>
{interviewer_question}
</question>

Answer in character, in plain text with no tags. Keep it to a few
sentences. If you genuinely do not want to answer, reply with exactly:
SKIP
";
