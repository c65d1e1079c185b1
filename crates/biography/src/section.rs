use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inline citation token extractor: `[MEM_<id>]`, case-sensitive.
static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(MEM_[\w-]+)\]").expect("valid citation regex"));

/// Pull the unique citation ids out of prose, in first-appearance order.
pub fn extract_citations(content: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in CITATION.captures_iter(content) {
        let id = caps[1].to_string();
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

/// Strip citation tokens from prose (used for display and markdown export).
pub fn strip_citations(content: &str) -> String {
    CITATION.replace_all(content, "").to_string()
}

/// A node of the biography tree.
///
/// `memory_ids` is the union of every citation that has ever appeared in
/// this section's content. Ids are never removed, even when the citing
/// token is later edited out. The list is an audit trail, not a render
/// index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub last_edit: DateTime<Utc>,
    #[serde(default)]
    pub memory_ids: Vec<String>,
    #[serde(default)]
    pub subsections: Vec<Section>,
}

impl Section {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut section = Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            created_at: now,
            last_edit: now,
            memory_ids: Vec::new(),
            subsections: Vec::new(),
        };
        section.absorb_citations();
        section
    }

    /// Union newly cited ids into `memory_ids` without removing existing
    /// ones.
    pub fn absorb_citations(&mut self) {
        for id in extract_citations(&self.content) {
            if !self.memory_ids.contains(&id) {
                self.memory_ids.push(id);
            }
        }
    }

    /// Replace content, refresh `last_edit`, and absorb new citations.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.last_edit = Utc::now();
        self.absorb_citations();
    }

    /// The numeric prefix of a numbered title, e.g. `"1.2 Career"` → `[1, 2]`.
    /// `None` when the title carries no parseable prefix (the root).
    pub fn number(&self) -> Option<Vec<u32>> {
        title_number(&self.title)
    }

    /// Keep subsections ordered by their numeric prefixes.
    pub fn sort_subsections(&mut self) {
        self.subsections
            .sort_by_key(|child| child.number().unwrap_or_default());
    }

    pub fn child(&self, title: &str) -> Option<&Section> {
        self.subsections.iter().find(|child| child.title == title)
    }

    pub fn child_mut(&mut self, title: &str) -> Option<&mut Section> {
        self.subsections
            .iter_mut()
            .find(|child| child.title == title)
    }

    /// Depth-first search by exact title, including self.
    pub fn find_by_title(&self, title: &str) -> Option<&Section> {
        if self.title == title {
            return Some(self);
        }
        self.subsections
            .iter()
            .find_map(|child| child.find_by_title(title))
    }

    pub fn find_by_title_mut(&mut self, title: &str) -> Option<&mut Section> {
        if self.title == title {
            return Some(self);
        }
        self.subsections
            .iter_mut()
            .find_map(|child| child.find_by_title_mut(title))
    }

    /// Parent of the section with the given title, if it is a descendant.
    pub fn find_parent_of_mut(&mut self, title: &str) -> Option<&mut Section> {
        if self.subsections.iter().any(|child| child.title == title) {
            return Some(self);
        }
        self.subsections
            .iter_mut()
            .find_map(|child| child.find_parent_of_mut(title))
    }

    /// Walk an exact slash path below self.
    pub fn descend(&self, parts: &[&str]) -> Option<&Section> {
        match parts.split_first() {
            None => Some(self),
            Some((head, rest)) => self.child(head).and_then(|child| child.descend(rest)),
        }
    }

    pub fn descend_mut(&mut self, parts: &[&str]) -> Option<&mut Section> {
        match parts.split_first() {
            None => Some(self),
            Some((head, rest)) => self
                .child_mut(head)
                .and_then(|child| child.descend_mut(rest)),
        }
    }

    /// Shallow copy with citation tokens stripped from content, recursively.
    pub fn with_hidden_citations(&self) -> Section {
        let mut copy = self.clone();
        copy.content = strip_citations(&copy.content);
        copy.subsections = copy
            .subsections
            .iter()
            .map(Section::with_hidden_citations)
            .collect();
        copy
    }

    /// Render as markdown; heading level equals depth.
    pub fn to_markdown(&self, level: usize, hide_citations: bool) -> String {
        let mut out = format!("{} {}\n\n", "#".repeat(level.max(1)), self.title);
        let content = if hide_citations {
            strip_citations(&self.content)
        } else {
            self.content.clone()
        };
        if !content.is_empty() {
            out.push_str(&content);
            out.push_str("\n\n");
        }
        for child in &self.subsections {
            out.push_str(&child.to_markdown(level + 1, hide_citations));
        }
        out
    }
}

/// Numeric prefix of a numbered title: `"1.2 Career"` → `[1, 2]`.
pub(crate) fn title_number(title: &str) -> Option<Vec<u32>> {
    let prefix = title.split_whitespace().next()?;
    let parts: Vec<u32> = prefix
        .split('.')
        .map(|part| part.parse::<u32>().ok())
        .collect::<Option<Vec<u32>>>()?;
    if parts.is_empty() { None } else { Some(parts) }
}

// ── Tests ────────────────────────────────────────────────────────────────────
