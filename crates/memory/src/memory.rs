use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One atomic fact or episode extracted from a user utterance.
///
/// Memories are append-only: ids are immutable, records are never mutated
/// or deleted during a session, and the session of origin always travels
/// with the record. The embedding is persisted separately by the bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    /// Stable identifier of the form `MEM_xxxxxxxx`, unique within a user.
    pub id: String,
    pub title: String,
    /// Summary of a single atomic fact or episode.
    pub text: String,
    /// Importance score 1–10.
    pub importance: u8,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Verbatim user utterance this memory derives from.
    pub source_quote: String,
    /// Session in which the memory was created.
    pub session_id: u32,
    pub created_at: DateTime<Utc>,
    /// Not serialized into the content snapshot; lives in the sibling
    /// embedding store.
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl Memory {
    /// Deterministic tagged serialization used when feeding memories into
    /// prompts. Downstream tests assert on this format.
    pub fn to_prompt_xml(&self, include_source: bool) -> String {
        let mut out = String::new();
        out.push_str("<memory>\n");
        out.push_str(&format!("  <id>{}</id>\n", self.id));
        out.push_str(&format!("  <title>{}</title>\n", self.title));
        out.push_str(&format!("  <content>{}</content>\n", self.text));
        if include_source {
            out.push_str(&format!("  <source>{}</source>\n", self.source_quote));
        }
        out.push_str("</memory>");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Memory {
        Memory {
            id: "MEM_0a1b2c3d".to_string(),
            title: "Boston childhood".to_string(),
            text: "User grew up in Boston's South End.".to_string(),
            importance: 7,
            metadata: BTreeMap::new(),
            source_quote: "I grew up in the South End of Boston.".to_string(),
            session_id: 1,
            created_at: Utc::now(),
            embedding: vec![0.1, 0.2],
        }
    }

    #[test]
    fn prompt_xml_with_source() {
        let xml = sample().to_prompt_xml(true);
        assert_eq!(
            xml,
            "<memory>\n  <id>MEM_0a1b2c3d</id>\n  <title>Boston childhood</title>\n  <content>User grew up in Boston's South End.</content>\n  <source>I grew up in the South End of Boston.</source>\n</memory>"
        );
    }

    #[test]
    fn prompt_xml_without_source() {
        let xml = sample().to_prompt_xml(false);
        assert!(!xml.contains("<source>"));
        assert!(xml.contains("<id>MEM_0a1b2c3d</id>"));
    }

    #[test]
    fn embedding_is_not_serialized() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("embedding"));
    }
}
