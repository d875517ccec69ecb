//! Tool registry and the uniform batch-invocation contract.
//!
//! Every tool input is `{ items: [ ...per-invocation records... ] }`.
//! A single-item call returns the singleton result directly; a
//! multi-item call returns `{ok, count, results, text}` where `text`
//! joins the per-item human-readable renderings. The registry owns this
//! shape so the turn engine can batch and summarize without per-tool
//! code.
//!
//! Tool failures are sentinel errors (`shell_command_missing`, …); the
//! dispatcher propagates them unchanged and the engine reports them as
//! `tool_result.ok = false` rather than aborting the turn.

pub mod browser;
pub mod file_ops;
pub mod search;
pub mod shell;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use nx_domain::config::SearchConfig;
use nx_domain::error::{Error, Result};
use nx_domain::message::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single tool. Implementations handle one item; the registry applies
/// the batch contract around them.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON Schema of one item record.
    fn item_schema(&self) -> Value;
    async fn invoke_item(&self, item: &Value) -> Result<Value>;
}

/// Configuration snapshot handed to the built-in tools at startup.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub shell_enabled: bool,
    pub search: SearchConfig,
    /// Headless browser agent binary.
    pub browser_command: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            shell_enabled: false,
            search: SearchConfig::default(),
            browser_command: "nextai-browser".into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Build the registry with the standard tool set.
    pub fn with_builtins(config: ToolConfig) -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(shell::ShellTool::new(config.shell_enabled)));
        reg.register(Arc::new(file_ops::ViewTool));
        reg.register(Arc::new(file_ops::EditTool));
        reg.register(Arc::new(browser::BrowserTool::new(config.browser_command)));
        reg.register(Arc::new(search::SearchTool::new(config.search)));
        reg
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool definitions exposed to the LLM, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "items": {
                            "type": "array",
                            "minItems": 1,
                            "items": t.item_schema(),
                        }
                    },
                    "required": ["items"],
                }),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Dispatch one tool call, applying the items contract.
    pub async fn dispatch(&self, name: &str, input: &Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::tool("tool_not_found", format!("unknown tool '{name}'")))?;

        let items = split_items(name, input)?;

        if items.len() == 1 {
            return tool.invoke_item(&items[0]).await;
        }

        let mut results = Vec::with_capacity(items.len());
        let mut all_ok = true;
        for item in &items {
            match tool.invoke_item(item).await {
                Ok(v) => results.push(v),
                Err(e) => {
                    all_ok = false;
                    results.push(serde_json::json!({
                        "ok": false,
                        "error": e.code(),
                        "text": e.to_string(),
                    }));
                }
            }
        }
        Ok(merge_results(all_ok, results))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the `items` array. Anything else is `<tool>_items_invalid`.
pub fn split_items(name: &str, input: &Value) -> Result<Vec<Value>> {
    let items = input
        .get("items")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            Error::tool(
                format!("{name}_items_invalid"),
                "input must be { items: [...] }",
            )
        })?;
    if items.is_empty() {
        return Err(Error::tool(
            format!("{name}_items_invalid"),
            "items must not be empty",
        ));
    }
    Ok(items.clone())
}

/// Merge per-item results into the multi-item envelope.
pub fn merge_results(ok: bool, results: Vec<Value>) -> Value {
    let text = results
        .iter()
        .map(render_text)
        .collect::<Vec<_>>()
        .join("\n");
    serde_json::json!({
        "ok": ok,
        "count": results.len(),
        "results": results,
        "text": text,
    })
}

/// Human-readable rendering of one result: its `text` field when
/// present, compact JSON otherwise.
pub fn render_text(result: &Value) -> String {
    match result.get("text").and_then(|v| v.as_str()) {
        Some(t) => t.to_string(),
        None => result.to_string(),
    }
}
