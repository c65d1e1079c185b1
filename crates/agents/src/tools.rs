//! Tools shared by several agents.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use memoir_memory::SharedMemoryBank;
use memoir_tools::{Tool, ToolOutput, ToolParam, ToolSpec};

/// Number of hits a recall search returns.
const RECALL_K: usize = 5;

/// `recall` — search the memory bank to enrich context before acting.
/// Used by the interviewer, the scribe, the section writers, and the
/// session summary writer.
pub struct RecallTool {
    memory_bank: SharedMemoryBank,
}

impl RecallTool {
    pub fn new(memory_bank: SharedMemoryBank) -> Self {
        Self { memory_bank }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "recall".to_string(),
            description: "Search the user's memory bank for memories relevant to a query."
                .to_string(),
            params: vec![
                ToolParam {
                    name: "query".to_string(),
                    description: "what to search for".to_string(),
                    required: true,
                },
                ToolParam {
                    name: "reasoning".to_string(),
                    description: "why this search is needed".to_string(),
                    required: false,
                },
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let query = args
            .get("query")
            .map(String::as_str)
            .unwrap_or_default()
            .trim();
        if query.is_empty() {
            return Ok(ToolOutput::failure("recall requires a non-empty query"));
        }

        let bank = self.memory_bank.read().await;
        let hits = bank.search(query, RECALL_K);
        if hits.is_empty() {
            return Ok(ToolOutput::ok("No memories found for this query."));
        }

        let rendered = hits
            .iter()
            .map(|hit| hit.memory.to_prompt_xml(true))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolOutput::ok(rendered))
    }
}
