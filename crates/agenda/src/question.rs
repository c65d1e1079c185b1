use serde::{Deserialize, Serialize};

/// One interview question in the agenda tree.
///
/// Ids are dotted paths (`"1"`, `"1.1"`, …, at most four levels). Notes are
/// appended as answers arrive; a question counts as answered when it has a
/// note of its own or anywhere below it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterviewQuestion {
    pub topic: String,
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub children: Vec<InterviewQuestion>,
}

impl InterviewQuestion {
    pub fn new(topic: impl Into<String>, id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            id: id.into(),
            text: text.into(),
            notes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Answered iff a note is attached here or on any descendant.
    pub fn is_answered(&self) -> bool {
        !self.notes.is_empty() || self.children.iter().any(InterviewQuestion::is_answered)
    }

    /// Last numeric component of the id (`"1.2"` → `2`).
    pub fn last_id_component(&self) -> Option<u32> {
        self.id.rsplit('.').next()?.parse().ok()
    }

    /// Find a node by full id in this subtree.
    pub fn find(&self, id: &str) -> Option<&InterviewQuestion> {
        if self.id == id {
            return Some(self);
        }
        // Only descend into subtrees whose id prefixes the target.
        if !id.starts_with(&format!("{}.", self.id)) {
            return None;
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut InterviewQuestion> {
        if self.id == id {
            return Some(self);
        }
        if !id.starts_with(&format!("{}.", self.id)) {
            return None;
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Collect `(topic, id, text)` for every unanswered, non-empty question
    /// in this subtree.
    pub fn collect_unanswered(&self, topic: &str, out: &mut Vec<(String, String, String)>) {
        if !self.is_answered() && !self.text.is_empty() {
            out.push((topic.to_string(), self.id.clone(), self.text.clone()));
        }
        for child in &self.children {
            child.collect_unanswered(topic, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_prunes_foreign_subtrees() {
        let mut root = InterviewQuestion::new("T", "1", "root?");
        root.children.push(InterviewQuestion::new("T", "1.1", "child?"));
        assert!(root.find("1.1").is_some());
        assert!(root.find("2").is_none());
        assert!(root.find("1.2").is_none());
        // "11" must not match the "1." prefix.
        assert!(root.find("11").is_none());
    }

    #[test]
    fn last_component_parses() {
        assert_eq!(InterviewQuestion::new("T", "3.2", "q").last_id_component(), Some(2));
        assert_eq!(InterviewQuestion::new("T", "7", "q").last_id_component(), Some(7));
    }

    #[test]
    fn unanswered_collection_skips_cleared_text() {
        let mut root = InterviewQuestion::new("T", "1", "");
        root.children.push(InterviewQuestion::new("T", "1.1", "kept?"));
        let mut out = Vec::new();
        root.collect_unanswered("T", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, "1.1");
    }
}
