//! File tools — `view` reads a line range, `edit` replaces one.
//!
//! Paths must be absolute. `view` is forgiving about bad ranges (falls
//! back to the full file and says so); `edit` refuses them.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::Tool;
use nx_domain::error::{Error, Result};

/// Maximum lines one `view` call returns.
const VIEW_MAX_LINES: usize = 400;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// view
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ViewItem {
    #[serde(default)]
    path: String,
    /// 1-based inclusive range.
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
}

pub struct ViewTool;

fn require_absolute(tool: &str, path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::tool(
            format!("{tool}_path_missing"),
            "path is required",
        ));
    }
    if !Path::new(path).is_absolute() {
        return Err(Error::tool(
            format!("{tool}_path_invalid"),
            format!("path must be absolute: {path}"),
        ));
    }
    Ok(())
}

#[async_trait::async_trait]
impl Tool for ViewTool {
    fn name(&self) -> &'static str {
        "view"
    }

    fn description(&self) -> &'static str {
        "Read a file by absolute path, optionally a 1-based [start_line, end_line] \
         range. At most 400 lines are returned."
    }

    fn item_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "start_line": { "type": "integer", "minimum": 1 },
                "end_line": { "type": "integer", "minimum": 1 },
            },
            "required": ["path"],
        })
    }

    async fn invoke_item(&self, item: &Value) -> Result<Value> {
        let item: ViewItem = serde_json::from_value(item.clone())
            .map_err(|e| Error::tool("view_items_invalid", e.to_string()))?;
        require_absolute("view", &item.path)?;

        let content = tokio::fs::read_to_string(&item.path).await.map_err(|e| {
            Error::tool(
                "view_file_not_found",
                format!("cannot read {}: {e}", item.path),
            )
        })?;
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();

        let (slice, start, note) = match (item.start_line, item.end_line) {
            (Some(s), Some(e)) if s >= 1 && s <= e && s <= total.max(1) => {
                let end = e.min(total);
                (&lines[s - 1..end], s, None)
            }
            (None, None) => (&lines[..], 1usize, None),
            _ => (
                &lines[..],
                1usize,
                Some(format!(
                    "requested range {:?}..{:?} is out of range for {total} lines; showing full file",
                    item.start_line, item.end_line
                )),
            ),
        };

        let shown = &slice[..slice.len().min(VIEW_MAX_LINES)];
        let text = shown
            .iter()
            .enumerate()
            .map(|(i, l)| format!("{:>6}  {}", start + i, l))
            .collect::<Vec<_>>()
            .join("\n");

        let mut out = serde_json::json!({
            "ok": true,
            "path": item.path,
            "start_line": start,
            "end_line": start + shown.len().saturating_sub(1),
            "total_lines": total,
            "text": text,
        });
        if let Some(n) = note {
            out["note"] = Value::String(n);
        }
        if shown.len() < slice.len() {
            out["note"] = Value::String(format!(
                "output limited to {VIEW_MAX_LINES} of {} requested lines",
                slice.len()
            ));
        }
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// edit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct EditItem {
    #[serde(default)]
    path: String,
    #[serde(default)]
    start_line: usize,
    #[serde(default)]
    end_line: usize,
    #[serde(default)]
    content: String,
}

pub struct EditTool;

#[async_trait::async_trait]
impl Tool for EditTool {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn description(&self) -> &'static str {
        "Replace a 1-based inclusive line range of a file with new content. \
         Out-of-range edits are refused."
    }

    fn item_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "start_line": { "type": "integer", "minimum": 1 },
                "end_line": { "type": "integer", "minimum": 1 },
                "content": { "type": "string" },
            },
            "required": ["path", "start_line", "end_line", "content"],
        })
    }

    async fn invoke_item(&self, item: &Value) -> Result<Value> {
        let item: EditItem = serde_json::from_value(item.clone())
            .map_err(|e| Error::tool("edit_items_invalid", e.to_string()))?;
        require_absolute("edit", &item.path)?;

        let original = tokio::fs::read_to_string(&item.path).await.map_err(|e| {
            Error::tool(
                "edit_file_not_found",
                format!("cannot read {}: {e}", item.path),
            )
        })?;
        let had_trailing_newline = original.ends_with('\n');
        let lines: Vec<&str> = original.lines().collect();
        let total = lines.len();

        if item.start_line < 1 || item.end_line < item.start_line || item.end_line > total {
            return Err(Error::tool(
                "edit_range_invalid",
                format!(
                    "range [{}, {}] is out of range for {total} lines",
                    item.start_line, item.end_line
                ),
            ));
        }

        let mut new_lines: Vec<&str> = Vec::with_capacity(total);
        new_lines.extend(&lines[..item.start_line - 1]);
        new_lines.extend(item.content.lines());
        new_lines.extend(&lines[item.end_line..]);

        let mut updated = new_lines.join("\n");
        if had_trailing_newline {
            updated.push('\n');
        }

        // Overwriting in place truncates the existing inode, so the
        // file's mode bits survive the edit.
        tokio::fs::write(&item.path, &updated).await.map_err(|e| {
            Error::tool(
                "edit_write_failed",
                format!("cannot write {}: {e}", item.path),
            )
        })?;

        let replaced = item.end_line - item.start_line + 1;
        let inserted = item.content.lines().count();
        Ok(serde_json::json!({
            "ok": true,
            "path": item.path,
            "replaced_lines": replaced,
            "inserted_lines": inserted,
            "total_lines": new_lines.len(),
            "text": format!(
                "replaced lines {}-{} of {} ({} -> {} lines)",
                item.start_line, item.end_line, item.path, replaced, inserted
            ),
        }))
    }
}
