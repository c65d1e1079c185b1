//! Prompts for the biography subteam: the planner, the section writers, and
//! the end-of-session summary/agenda rewrite.

use crate::format_prompt;

pub struct PlannerArgs<'a> {
    pub new_memories: &'a str,
    pub conversation_summary: &'a str,
    pub sections_overview: &'a str,
    /// Structured errors from a rejected batch; empty on the first pass.
    pub validation_feedback: &'a str,
    pub tool_descriptions: &'a str,
}

pub fn planner(args: &PlannerArgs<'_>) -> String {
    format_prompt(PLANNER, &[
        ("new_memories", args.new_memories),
        ("conversation_summary", args.conversation_summary),
        ("sections_overview", args.sections_overview),
        ("validation_feedback", args.validation_feedback),
        ("tool_descriptions", args.tool_descriptions),
    ])
}

pub struct SectionWriterArgs<'a> {
    /// `<section_path>…</section_path>` or `<section_title>…</section_title>`.
    pub section_identifier: &'a str,
    pub update_plan: &'a str,
    pub current_content: &'a str,
    pub relevant_memories: &'a str,
    pub event_stream: &'a str,
    pub tool_descriptions: &'a str,
}

pub fn section_writer(args: &SectionWriterArgs<'_>) -> String {
    format_prompt(SECTION_WRITER, &[
        ("section_identifier", args.section_identifier),
        ("update_plan", args.update_plan),
        ("current_content", args.current_content),
        ("relevant_memories", args.relevant_memories),
        ("event_stream", args.event_stream),
        ("tool_descriptions", args.tool_descriptions),
    ])
}

pub struct SessionSummaryArgs<'a> {
    pub new_memories: &'a str,
    pub user_portrait: &'a str,
    pub tool_descriptions: &'a str,
}

pub fn session_summary(args: &SessionSummaryArgs<'_>) -> String {
    format_prompt(SESSION_SUMMARY, &[
        ("new_memories", args.new_memories),
        ("user_portrait", args.user_portrait),
        ("tool_descriptions", args.tool_descriptions),
    ])
}

pub struct InterviewQuestionsArgs<'a> {
    pub old_questions_and_notes: &'a str,
    pub follow_up_questions: &'a str,
    pub selected_topics: &'a str,
    pub event_stream: &'a str,
    pub tool_descriptions: &'a str,
}

pub fn interview_questions(args: &InterviewQuestionsArgs<'_>) -> String {
    format_prompt(INTERVIEW_QUESTIONS, &[
        ("old_questions_and_notes", args.old_questions_and_notes),
        ("follow_up_questions", args.follow_up_questions),
        ("selected_topics", args.selected_topics),
        ("event_stream", args.event_stream),
        ("tool_descriptions", args.tool_descriptions),
    ])
}

pub fn topic_extraction(memories_text: &str) -> String {
    format_prompt(TOPIC_EXTRACTION, &[("memories_text", memories_text)])
}

const PLANNER: &str = "\
You are the planner of a biography-writing team. New memories from the
current interview session must be worked into the biography.

New memories:
<new_memories>
{new_memories}
</new_memories>

Rolling summary of the conversation so far:
<conversation_summary>
{conversation_summary}
</conversation_summary>

Current biography sections:
<sections_overview>
{sections_overview}
</sections_overview>

{validation_feedback}

<tool_descriptions>
{tool_descriptions}
</tool_descriptions>

<instructions>
Emit one add_plan call per section that should change:
- action is one of create, update, or title_update;
- for create, give the full slash path with sequential numbering
  (\"1 Early Life\", \"1 Early Life/1.1 Childhood\"). First-level sections are
  numbered N, second-level N.M under \"N …\", third-level N.M.K — never
  deeper, and never skipping a number;
- for update or title_update, identify the section by path or exact title;
- update_plan describes in two or three sentences what the writer should
  change;
- memory_ids lists the new memory ids this plan draws on (comma-separated).
Group related memories into the same plan. Only plan sections this batch of
memories genuinely affects.
</instructions>
";

const SECTION_WRITER: &str = "\
You are a section writer on a biography team, executing one update plan.

Target section:
{section_identifier}

Update plan:
<update_plan>
{update_plan}
</update_plan>

Current section content:
<current_content>
{current_content}
</current_content>

Relevant memories:
<relevant_memories>
{relevant_memories}
</relevant_memories>

Earlier recall results:
<event_stream>
{event_stream}
</event_stream>

<tool_descriptions>
{tool_descriptions}
</tool_descriptions>

<instructions>
Write flowing third-person prose. Every factual sentence must cite the
memory it comes from by appending its citation token, e.g. \"She grew up in
Boston [MEM_abc123].\" Keep existing content unless the plan says to rework
it. If you need context beyond the provided memories, issue a single recall
call first; otherwise finish with one add_section or update_section call.
You may also propose_follow_up for gaps the biography still has.
</instructions>
";

const SESSION_SUMMARY: &str = "\
The interview session has ended. Update the durable records on the agenda.

Memories collected this session:
<new_memories>
{new_memories}
</new_memories>

Current user portrait:
<user_portrait>
{user_portrait}
</user_portrait>

<tool_descriptions>
{tool_descriptions}
</tool_descriptions>

<instructions>
First call update_last_meeting_summary once with a short paragraph a friend
would write about what was discussed. Then call update_user_portrait for
each durable fact the session established or corrected (name, age,
occupation, places, close relationships). Portrait values are facts, not
stories.
</instructions>
";

const INTERVIEW_QUESTIONS: &str = "\
Rebuild the interview agenda for the next session.

Questions and notes from the session that just ended:
<old_questions_and_notes>
{old_questions_and_notes}
</old_questions_and_notes>

Follow-up questions proposed during the session:
<follow_up_questions>
{follow_up_questions}
</follow_up_questions>

Topics the operator wants covered next:
<selected_topics>
{selected_topics}
</selected_topics>

Earlier recall results:
<event_stream>
{event_stream}
</event_stream>

<tool_descriptions>
{tool_descriptions}
</tool_descriptions>

<instructions>
The agenda has been cleared. Re-add only what matters, with fresh
sequential ids starting at 1:
- carry over unanswered questions that are still worth asking;
- keep the strongest proposed follow-ups;
- add one or two opening questions per selected topic.
Use recall first if you need to check what the user has already covered;
otherwise respond with add_interview_question calls only.
</instructions>
";

const TOPIC_EXTRACTION: &str = "\
List the main topics covered by these interview memories, one per line,
most prominent first. Output only the topic lines.

<memories>
{memories_text}
</memories>
";
