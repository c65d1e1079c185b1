//! Parser for the tagged tool-call format.
//!
//! The grammar is deliberately small: a `<tool_calls>` wrapper containing a
//! sequence of `<name>…</name>` elements whose children are scalar
//! `<arg>value</arg>` pairs. Repeated sibling elements of the same tool name
//! are independent calls; repeated argument tags inside one call keep the
//! last value.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// One parsed invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    pub args: HashMap<String, String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    /// The response carries no `<tool_calls>` block at all.
    #[error("response contains no <tool_calls> block")]
    NoToolCalls,
    /// The block is present but structurally broken.
    #[error("malformed tool_calls block: {0}")]
    Malformed(String),
}

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z_][A-Za-z0-9_-]*)>").expect("valid tag regex"));

/// Extract the raw `<tool_calls>…</tool_calls>` block, if any.
///
/// Used verbatim when re-prompting an agent about its previous attempt.
pub fn extract_tool_calls_block(response: &str) -> Option<&str> {
    let start = response.find("<tool_calls>")?;
    let end = response.find("</tool_calls>")?;
    if end < start {
        return None;
    }
    Some(&response[start..end + "</tool_calls>".len()])
}

/// Parse every tool invocation in the response's `<tool_calls>` block.
pub fn parse_tool_calls(response: &str) -> Result<Vec<ToolCall>, ToolCallError> {
    let block = extract_tool_calls_block(response).ok_or(ToolCallError::NoToolCalls)?;
    let inner = block
        .strip_prefix("<tool_calls>")
        .and_then(|rest| rest.strip_suffix("</tool_calls>"))
        .ok_or_else(|| ToolCallError::Malformed("unbalanced wrapper".to_string()))?;

    let mut calls = Vec::new();
    for (name, body) in scan_elements(inner)? {
        let mut call = ToolCall::new(name);
        for (arg, value) in scan_elements(body)? {
            call.args.insert(arg, value.trim().to_string());
        }
        calls.push(call);
    }
    Ok(calls)
}

/// Scan a sequence of sibling `<tag>…</tag>` elements, returning
/// `(tag, inner)` pairs in document order. Free text between elements is
/// ignored; an element missing its closing tag is an error.
fn scan_elements(input: &str) -> Result<Vec<(String, &str)>, ToolCallError> {
    let mut elements = Vec::new();
    let mut cursor = 0;

    while let Some(found) = OPEN_TAG.find_at(input, cursor) {
        let tag = OPEN_TAG
            .captures(&input[found.start()..])
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ToolCallError::Malformed("unreadable tag".to_string()))?;

        let body_start = found.end();
        let close = format!("</{tag}>");
        let rel_end = input[body_start..]
            .find(&close)
            .ok_or_else(|| ToolCallError::Malformed(format!("missing {close}")))?;

        elements.push((tag, &input[body_start..body_start + rel_end]));
        cursor = body_start + rel_end + close.len();
    }

    Ok(elements)
}

/// Serialize calls back into the canonical block. Arguments are emitted in
/// sorted order so the output is deterministic; parse→serialize→parse is
/// identity under argument-reordering equivalence.
pub fn serialize_tool_calls(calls: &[ToolCall]) -> String {
    let mut out = String::from("<tool_calls>\n");
    for call in calls {
        out.push_str(&format!("  <{}>\n", call.name));
        let mut keys: Vec<&String> = call.args.keys().collect();
        keys.sort();
        for key in keys {
            out.push_str(&format!("    <{key}>{}</{key}>\n", call.args[key]));
        }
        out.push_str(&format!("  </{}>\n", call.name));
    }
    out.push_str("</tool_calls>");
    out
}

/// Collect the values of one argument across every call to `tool_name`.
pub fn extract_tool_arguments(
    response: &str,
    tool_name: &str,
    arg_name: &str,
) -> Result<Vec<String>, ToolCallError> {
    let calls = parse_tool_calls(response)?;
    Ok(calls
        .into_iter()
        .filter(|call| call.name == tool_name)
        .filter_map(|call| call.args.get(arg_name).cloned())
        .collect())
}

/// Extract the inner text of the first `<tag>…</tag>` anywhere in the
/// response (outside or inside a tool block). Used for scalar decisions
/// like `<proceed>true</proceed>`.
pub fn extract_tag(response: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = response.find(&open)? + open.len();
    let rel_end = response[start..].find(&close)?;
    Some(response[start..start + rel_end].trim().to_string())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"Let me note that down.
<tool_calls>
  <update_memory_bank>
    <title>Childhood in Boston</title>
    <text>User grew up in the South End of Boston.</text>
    <importance>7</importance>
  </update_memory_bank>
  <add_historical_question>
    <question>Where did you grow up?</question>
    <memory_ids>TEMP_1</memory_ids>
  </add_historical_question>
</tool_calls>"#;

    #[test]
    fn parses_multiple_calls_in_order() {
        let calls = parse_tool_calls(SAMPLE).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "update_memory_bank");
        assert_eq!(calls[0].arg("title"), Some("Childhood in Boston"));
        assert_eq!(calls[0].arg("importance"), Some("7"));
        assert_eq!(calls[1].name, "add_historical_question");
        assert_eq!(calls[1].arg("memory_ids"), Some("TEMP_1"));
    }

    #[test]
    fn repeated_sibling_tags_are_separate_calls() {
        let response = "<tool_calls><add_note><note>a</note></add_note><add_note><note>b</note></add_note></tool_calls>";
        let calls = parse_tool_calls(response).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arg("note"), Some("a"));
        assert_eq!(calls[1].arg("note"), Some("b"));
    }

    #[test]
    fn multiline_argument_values_survive() {
        let response =
            "<tool_calls><update_section><content>Line one.\nLine two.</content></update_section></tool_calls>";
        let calls = parse_tool_calls(response).unwrap();
        assert_eq!(calls[0].arg("content"), Some("Line one.\nLine two."));
    }

    #[test]
    fn missing_block_is_no_tool_calls() {
        assert_eq!(
            parse_tool_calls("just prose, no calls"),
            Err(ToolCallError::NoToolCalls)
        );
    }

    #[test]
    fn unterminated_element_is_malformed() {
        let response = "<tool_calls><recall><query>college</recall></tool_calls>";
        match parse_tool_calls(response) {
            Err(ToolCallError::Malformed(_)) => {}
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn call_with_no_arguments_parses_empty() {
        let response = "<tool_calls><end_conversation></end_conversation></tool_calls>";
        let calls = parse_tool_calls(response).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "end_conversation");
        assert!(calls[0].args.is_empty());
    }

    #[test]
    fn roundtrip_is_structurally_equivalent() {
        let calls = parse_tool_calls(SAMPLE).unwrap();
        let serialized = serialize_tool_calls(&calls);
        let reparsed = parse_tool_calls(&serialized).unwrap();
        assert_eq!(calls, reparsed);
    }

    #[test]
    fn roundtrip_under_argument_reordering() {
        let a = "<tool_calls><recall><query>q</query><reasoning>r</reasoning></recall></tool_calls>";
        let b = "<tool_calls><recall><reasoning>r</reasoning><query>q</query></recall></tool_calls>";
        assert_eq!(parse_tool_calls(a).unwrap(), parse_tool_calls(b).unwrap());
    }

    #[test]
    fn extract_tool_arguments_filters_by_tool_and_arg() {
        let questions = extract_tool_arguments(SAMPLE, "add_historical_question", "question").unwrap();
        assert_eq!(questions, vec!["Where did you grow up?".to_string()]);
        let absent = extract_tool_arguments(SAMPLE, "recall", "query").unwrap();
        assert!(absent.is_empty());
    }

    #[test]
    fn extract_tag_reads_scalar_decisions() {
        let response = "I should still ask this.\n<proceed>true</proceed>\n<tool_calls><noop></noop></tool_calls>";
        assert_eq!(extract_tag(response, "proceed").as_deref(), Some("true"));
        assert_eq!(extract_tag(response, "missing"), None);
    }

    #[test]
    fn extract_block_returns_verbatim_slice() {
        let block = extract_tool_calls_block(SAMPLE).unwrap();
        assert!(block.starts_with("<tool_calls>"));
        assert!(block.ends_with("</tool_calls>"));
        assert!(block.contains("Childhood in Boston"));
    }
}
