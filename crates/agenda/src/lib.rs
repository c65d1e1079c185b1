//! Session agenda — the coordination artifact between agents.
//!
//! An agenda carries the user portrait, the last-meeting summary, and a
//! topic-grouped tree of interview questions with notes. The scribe appends
//! notes and follow-ups during the session; the orchestrator clears and
//! rebuilds the agenda for the next session at session end.

mod question;

pub use question::InterviewQuestion;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Maximum depth of a question id (`1.1.1.1`).
pub const MAX_QUESTION_DEPTH: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgendaError {
    #[error("invalid question id: {0}")]
    InvalidQuestionId(String),
    #[error("question with id {0} not found")]
    QuestionNotFound(String),
    #[error("parent question with id {0} not found")]
    ParentNotFound(String),
    #[error("question with id {0} already exists")]
    DuplicateQuestionId(String),
    #[error("question with id {0} must follow its existing siblings")]
    NonSequentialQuestionId(String),
}

/// One named topic grouping a forest of root questions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub questions: Vec<InterviewQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionAgenda {
    pub user_id: String,
    /// Monotonic per user; the first real session is 1.
    pub session_id: u32,
    /// Ordered key/value pairs of durable facts (Name, Age, Occupation, …).
    pub user_portrait: Vec<(String, String)>,
    pub last_meeting_summary: String,
    pub topics: Vec<Topic>,
    /// Notes not bound to any question.
    pub additional_notes: Vec<String>,
}

impl SessionAgenda {
    pub fn new(user_id: impl Into<String>, session_id: u32) -> Self {
        Self {
            user_id: user_id.into(),
            session_id,
            user_portrait: Vec::new(),
            last_meeting_summary: String::new(),
            topics: Vec::new(),
            additional_notes: Vec::new(),
        }
    }

    /// Seed agenda for a brand-new user. Session id 0 means "no session has
    /// happened yet"; the engine's first session becomes 1.
    pub fn initial(user_id: impl Into<String>) -> Self {
        let mut agenda = Self::new(user_id, 0);
        agenda.user_portrait = vec![
            ("Name".to_string(), "Unknown".to_string()),
            ("Age".to_string(), "Unknown".to_string()),
            ("Occupation".to_string(), "Unknown".to_string()),
        ];
        agenda.last_meeting_summary =
            "This is the very first session with the user.".to_string();

        let seeds = [
            ("General", "1", "Can you introduce yourself a little?"),
            ("General", "2", "How has your day been so far?"),
            ("Personal", "3", "Where did you grow up?"),
            ("Personal", "4", "What did your childhood home look like?"),
        ];
        for (topic, id, text) in seeds {
            agenda
                .add_interview_question(topic, text, id)
                .expect("seed questions are well-formed");
        }
        agenda
    }

    // ── Portrait & summary ──────────────────────────────────────────────────

    /// Set or update one portrait field, preserving insertion order.
    pub fn set_portrait_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.user_portrait.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.user_portrait.push((key, value)),
        }
    }

    pub fn set_last_meeting_summary(&mut self, summary: impl Into<String>) {
        self.last_meeting_summary = summary.into();
    }

    /// `Key: value` lines in insertion order.
    pub fn get_user_portrait_str(&self) -> String {
        self.user_portrait
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn get_last_meeting_summary_str(&self) -> &str {
        &self.last_meeting_summary
    }

    // ── Questions ───────────────────────────────────────────────────────────

    /// Add a question under `topic`. Sub-questions resolve their parent by
    /// id across all topics; the parent must exist first, and the new id
    /// must extend the existing sibling sequence without holes.
    pub fn add_interview_question(
        &mut self,
        topic: &str,
        text: &str,
        id: &str,
    ) -> Result<(), AgendaError> {
        let components = parse_question_id(id)?;
        if self.find_question(id).is_some() {
            return Err(AgendaError::DuplicateQuestionId(id.to_string()));
        }

        let question = InterviewQuestion::new(topic, id, text.trim());

        if components.len() == 1 {
            let number = components[0];
            let existing = self.top_level_numbers();
            for required in 1..number {
                if !existing.contains(&required) {
                    return Err(AgendaError::NonSequentialQuestionId(id.to_string()));
                }
            }
            let index = match self.topics.iter().position(|t| t.name == topic) {
                Some(index) => index,
                None => {
                    self.topics.push(Topic {
                        name: topic.to_string(),
                        questions: Vec::new(),
                    });
                    self.topics.len() - 1
                }
            };
            self.topics[index].questions.push(question);
            return Ok(());
        }

        let parent_id = components[..components.len() - 1]
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");
        let number = *components.last().expect("non-empty id");

        let parent = self
            .find_question_mut(&parent_id)
            .ok_or(AgendaError::ParentNotFound(parent_id.clone()))?;
        let siblings: Vec<u32> = parent
            .children
            .iter()
            .filter_map(|child| child.last_id_component())
            .collect();
        for required in 1..number {
            if !siblings.contains(&required) {
                return Err(AgendaError::NonSequentialQuestionId(id.to_string()));
            }
        }
        parent.children.push(question);
        Ok(())
    }

    /// Append a note to a question, or to the unbound notes when no id is
    /// given.
    pub fn add_note(&mut self, question_id: Option<&str>, note: &str) -> Result<(), AgendaError> {
        match question_id {
            Some(id) => {
                let question = self
                    .find_question_mut(id)
                    .ok_or(AgendaError::QuestionNotFound(id.to_string()))?;
                question.notes.push(note.to_string());
                Ok(())
            }
            None => {
                self.additional_notes.push(note.to_string());
                Ok(())
            }
        }
    }

    /// Delete a question. A leaf is removed; a question with children keeps
    /// its structural node so descendants stay addressable, and only its
    /// text and notes are cleared.
    pub fn delete_interview_question(&mut self, id: &str) -> Result<(), AgendaError> {
        let components = parse_question_id(id)?;
        let target = self
            .find_question(id)
            .ok_or(AgendaError::QuestionNotFound(id.to_string()))?;
        let has_children = !target.children.is_empty();

        if components.len() == 1 {
            for topic in &mut self.topics {
                if has_children {
                    if let Some(question) = topic.questions.iter_mut().find(|q| q.id == id) {
                        question.text.clear();
                        question.notes.clear();
                        return Ok(());
                    }
                } else if topic.questions.iter().any(|q| q.id == id) {
                    topic.questions.retain(|q| q.id != id);
                    return Ok(());
                }
            }
            return Err(AgendaError::QuestionNotFound(id.to_string()));
        }

        let parent_id = components[..components.len() - 1]
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");
        let parent = self
            .find_question_mut(&parent_id)
            .ok_or(AgendaError::ParentNotFound(parent_id.clone()))?;

        if has_children {
            let question = parent
                .children
                .iter_mut()
                .find(|child| child.id == id)
                .ok_or(AgendaError::QuestionNotFound(id.to_string()))?;
            question.text.clear();
            question.notes.clear();
        } else {
            parent.children.retain(|child| child.id != id);
        }
        Ok(())
    }

    /// Drop every topic, question, and unbound note. The portrait and
    /// last-meeting summary survive.
    pub fn clear_questions(&mut self) {
        self.topics.clear();
        self.additional_notes.clear();
    }

    pub fn find_question(&self, id: &str) -> Option<&InterviewQuestion> {
        self.topics
            .iter()
            .flat_map(|topic| topic.questions.iter())
            .find_map(|question| question.find(id))
    }

    pub fn find_question_mut(&mut self, id: &str) -> Option<&mut InterviewQuestion> {
        self.topics
            .iter_mut()
            .flat_map(|topic| topic.questions.iter_mut())
            .find_map(|question| question.find_mut(id))
    }

    fn top_level_numbers(&self) -> Vec<u32> {
        self.topics
            .iter()
            .flat_map(|topic| topic.questions.iter())
            .filter_map(|question| question.last_id_component())
            .collect()
    }

    // ── Formatting (stable, tested) ─────────────────────────────────────────

    /// Render one question subtree. Every question renders on a line tagged
    /// `[ID] {id}: {text}`; notes render as `[note] …` under their
    /// question. With `hide_answered`, answered questions collapse to
    /// `(Answered)` and their notes are suppressed.
    pub fn format_qa(question: &InterviewQuestion, hide_answered: bool) -> Vec<String> {
        let mut lines = Vec::new();
        if hide_answered && question.is_answered() {
            lines.push(format!("\n[ID] {}: (Answered)", question.id));
        } else {
            lines.push(format!("\n[ID] {}: {}", question.id, question.text));
            for note in &question.notes {
                lines.push(format!("[note] {note}"));
            }
        }
        for child in &question.children {
            lines.extend(Self::format_qa(child, hide_answered));
        }
        lines
    }

    pub fn get_questions_and_notes_str(&self, hide_answered: bool) -> String {
        let mut lines = Vec::new();
        for topic in &self.topics {
            lines.push(format!("\nTopic: {}", topic.name));
            for question in &topic.questions {
                lines.extend(Self::format_qa(question, hide_answered));
            }
        }
        lines.join("\n")
    }

    /// Ids and texts of every question nobody has answered yet: the
    /// carryover pool for the next session's agenda.
    pub fn unanswered_questions(&self) -> Vec<(String, String, String)> {
        let mut out = Vec::new();
        for topic in &self.topics {
            for question in &topic.questions {
                question.collect_unanswered(&topic.name, &mut out);
            }
        }
        out
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    fn file_path(dir: &Path, session_id: u32) -> PathBuf {
        dir.join(format!("session_agenda_{session_id}.json"))
    }

    pub fn save(&self, user_logs_dir: impl AsRef<Path>) -> Result<()> {
        let dir = user_logs_dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = Self::file_path(dir, self.session_id);
        let rendered = serde_json::to_string_pretty(self)?;
        fs::write(&path, rendered).with_context(|| format!("write {}", path.display()))?;
        info!(session = self.session_id, path = %path.display(), "session agenda saved");
        Ok(())
    }

    /// Latest saved agenda for the user, or the seed agenda when none
    /// exists yet.
    pub fn load_last(user_id: &str, user_logs_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = user_logs_dir.as_ref();
        let latest = latest_session_id(dir);
        match latest {
            None => Ok(Self::initial(user_id)),
            Some(session_id) => {
                let path = Self::file_path(dir, session_id);
                let raw =
                    fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
                Ok(serde_json::from_str(&raw)?)
            }
        }
    }
}

/// Parse a dotted question id into its numeric components.
fn parse_question_id(id: &str) -> Result<Vec<u32>, AgendaError> {
    let components: Option<Vec<u32>> = id.split('.').map(|part| part.parse().ok()).collect();
    match components {
        Some(components)
            if !components.is_empty()
                && components.len() <= MAX_QUESTION_DEPTH
                && components.iter().all(|c| *c > 0) =>
        {
            Ok(components)
        }
        _ => Err(AgendaError::InvalidQuestionId(id.to_string())),
    }
}

fn latest_session_id(dir: &Path) -> Option<u32> {
    let entries = fs::read_dir(dir).ok()?;
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_prefix("session_agenda_")?
                .strip_suffix(".json")?
                .parse::<u32>()
                .ok()
        })
        .max()
}

// ── Tests ────────────────────────────────────────────────────────────────────
