//! Tool/call protocol — the only interface between LLM output and system
//! state.
//!
//! Agents describe their local capabilities as [`ToolSpec`]s, embed the
//! rendered descriptions in prompts, and hand each model response to
//! [`parse_tool_calls`] / [`dispatch_tool_calls`]. A response requesting
//! side effects carries a block of the form:
//!
//! ```text
//! <tool_calls>
//!   <tool_name>
//!     <arg>value</arg>
//!   </tool_name>
//! </tool_calls>
//! ```

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod calls;

pub use calls::{
    ToolCall, ToolCallError, extract_tag, extract_tool_arguments, extract_tool_calls_block,
    parse_tool_calls, serialize_tool_calls,
};

// ── Tool trait and registry ──────────────────────────────────────────────────

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Static metadata about a tool, used by the LLM to decide which tool to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

impl ToolSpec {
    /// Render the spec as the XML block embedded into prompts.
    pub fn to_prompt_xml(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("<tool name=\"{}\">\n", self.name));
        out.push_str(&format!("  <description>{}</description>\n", self.description));
        for param in &self.params {
            out.push_str(&format!(
                "  <param name=\"{}\" required=\"{}\">{}</param>\n",
                param.name, param.required, param.description
            ));
        }
        out.push_str("</tool>");
        out
    }
}

/// The result returned after a tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Trait implemented by every local capability an agent can invoke.
///
/// Arguments arrive as scalar strings keyed by parameter name; typed
/// conversion happens inside the tool so a bad value surfaces as a per-call
/// failure rather than a protocol error.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput>;
}

/// Central registry for the tools one agent exposes to its prompts.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }

    /// Render prompt descriptions for a subset of tools, in registration
    /// order. Unknown names are skipped.
    pub fn describe(&self, selected: &[&str]) -> String {
        self.tools
            .iter()
            .map(|t| t.spec())
            .filter(|spec| selected.contains(&spec.name.as_str()))
            .map(|spec| spec.to_prompt_xml())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn describe_all(&self) -> String {
        self.tools
            .iter()
            .map(|t| t.spec().to_prompt_xml())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Outcome of one call inside a `<tool_calls>` block.
#[derive(Debug)]
pub struct CallOutcome {
    pub call: ToolCall,
    pub result: Result<ToolOutput>,
}

/// Parse the response's tool-call block and run each call in order.
///
/// Individual tool failures (including unknown tool names) are captured in
/// the per-call outcome and do not stop later calls; a missing or malformed
/// block is a protocol-level [`ToolCallError`].
pub async fn dispatch_tool_calls(
    registry: &ToolRegistry,
    response: &str,
) -> Result<Vec<CallOutcome>, ToolCallError> {
    let parsed = parse_tool_calls(response)?;
    let mut outcomes = Vec::with_capacity(parsed.len());

    for call in parsed {
        let result = match registry.get(&call.name) {
            Some(tool) => tool.run(&call.args).await,
            None => Err(anyhow::anyhow!("unknown tool: {}", call.name)),
        };
        if let Err(err) = &result {
            tracing::warn!(tool = %call.name, %err, "tool call failed");
        }
        outcomes.push(CallOutcome { call, result });
    }

    Ok(outcomes)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod registry_tests {
    use super::*;

    struct EchoTool {
        name: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: format!("Echoes its input ({})", self.name),
                params: vec![ToolParam {
                    name: "text".to_string(),
                    description: "text to echo".to_string(),
                    required: true,
                }],
            }
        }

        async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
            let text = args.get("text").cloned().unwrap_or_default();
            Ok(ToolOutput::ok(text))
        }
    }

    #[test]
    fn empty_registry() {
        let reg = ToolRegistry::default();
        assert!(reg.list_specs().is_empty());
        assert!(reg.get("anything").is_none());
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(EchoTool { name: "alpha".into() }));
        reg.register(Box::new(EchoTool { name: "beta".into() }));

        assert!(reg.get("alpha").is_some());
        assert!(reg.get("gamma").is_none());
    }

    #[test]
    fn describe_filters_and_preserves_order() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(EchoTool { name: "one".into() }));
        reg.register(Box::new(EchoTool { name: "two".into() }));
        reg.register(Box::new(EchoTool { name: "three".into() }));

        let described = reg.describe(&["three", "one"]);
        let one_at = described.find("name=\"one\"").unwrap();
        let three_at = described.find("name=\"three\"").unwrap();
        assert!(one_at < three_at, "registration order wins over selection order");
        assert!(!described.contains("name=\"two\""));
    }

    #[tokio::test]
    async fn dispatch_runs_calls_in_order() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(EchoTool { name: "echo".into() }));

        let response = "Sure.\n<tool_calls>\n  <echo>\n    <text>first</text>\n  </echo>\n  <echo>\n    <text>second</text>\n  </echo>\n</tool_calls>";
        let outcomes = dispatch_tool_calls(&reg, response).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].result.as_ref().unwrap().output, "first");
        assert_eq!(outcomes[1].result.as_ref().unwrap().output, "second");
    }

    #[tokio::test]
    async fn dispatch_captures_unknown_tool_without_stopping() {
        let mut reg = ToolRegistry::default();
        reg.register(Box::new(EchoTool { name: "echo".into() }));

        let response = "<tool_calls>\n<mystery><text>x</text></mystery>\n<echo><text>y</text></echo>\n</tool_calls>";
        let outcomes = dispatch_tool_calls(&reg, response).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[1].result.as_ref().unwrap().output, "y");
    }

    #[test]
    fn spec_prompt_xml_contains_params() {
        let spec = ToolSpec {
            name: "recall".to_string(),
            description: "Search the memory bank".to_string(),
            params: vec![ToolParam {
                name: "query".to_string(),
                description: "search query".to_string(),
                required: true,
            }],
        };
        let xml = spec.to_prompt_xml();
        assert!(xml.contains("<tool name=\"recall\">"));
        assert!(xml.contains("param name=\"query\""));
    }
}
