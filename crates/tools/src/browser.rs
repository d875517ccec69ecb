//! Browser tool — hand a task string to the local headless browser
//! agent process and surface its run metadata.
//!
//! The agent prints a JSON object (or `key: value` lines) from which
//! `run_id`, `log`, and `shots` are extracted.

use serde::Deserialize;
use serde_json::Value;

use crate::Tool;
use nx_domain::error::{Error, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
struct BrowserItem {
    #[serde(default)]
    task: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

pub struct BrowserTool {
    command: String,
}

impl BrowserTool {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

/// Pull `run_id` / `log` / `shots` out of agent output. JSON output is
/// preferred; otherwise `key: value` lines are scanned.
pub fn extract_meta(output: &str) -> (String, String, Vec<String>) {
    if let Ok(v) = serde_json::from_str::<Value>(output.trim()) {
        let run_id = v
            .get("run_id")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string();
        let log = v
            .get("log")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string();
        let shots = v
            .get("shots")
            .and_then(|x| x.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        return (run_id, log, shots);
    }

    let mut run_id = String::new();
    let mut log = String::new();
    let mut shots = Vec::new();
    for line in output.lines() {
        if let Some(v) = line.strip_prefix("run_id:") {
            run_id = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("log:") {
            log = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("shot:") {
            shots.push(v.trim().to_string());
        }
    }
    (run_id, log, shots)
}

#[async_trait::async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn description(&self) -> &'static str {
        "Run a task in the local headless browser agent and return its \
         run_id, log path, and screenshot paths."
    }

    fn item_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": { "type": "string" },
                "timeout_seconds": { "type": "integer", "minimum": 1 },
            },
            "required": ["task"],
        })
    }

    async fn invoke_item(&self, item: &Value) -> Result<Value> {
        let item: BrowserItem = serde_json::from_value(item.clone())
            .map_err(|e| Error::tool("browser_items_invalid", e.to_string()))?;
        if item.task.trim().is_empty() {
            return Err(Error::tool("browser_task_missing", "task is required"));
        }

        let timeout = std::time::Duration::from_secs(
            item.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg(&item.task);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);

        let out = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::tool(
                    "browser_timeout",
                    format!("browser agent did not finish within {}s", timeout.as_secs()),
                )
            })?
            .map_err(|e| {
                Error::tool(
                    "browser_launch_failed",
                    format!("failed to launch '{}': {e}", self.command),
                )
            })?;

        let stdout = String::from_utf8_lossy(&out.stdout);
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(Error::tool(
                "browser_task_failed",
                format!(
                    "browser agent exited with {}: {}",
                    out.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            ));
        }

        let (run_id, log, shots) = extract_meta(&stdout);
        Ok(serde_json::json!({
            "ok": true,
            "run_id": run_id,
            "log": log,
            "shots": shots,
            "text": format!("browser run {run_id}: {} screenshot(s), log at {log}", shots.len()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_meta_from_json() {
        let out = r#"{"run_id":"r-1","log":"/tmp/r-1.log","shots":["/tmp/a.png","/tmp/b.png"]}"#;
        let (run_id, log, shots) = extract_meta(out);
        assert_eq!(run_id, "r-1");
        assert_eq!(log, "/tmp/r-1.log");
        assert_eq!(shots.len(), 2);
    }

    #[test]
    fn extract_meta_from_lines() {
        let out = "starting\nrun_id: r-2\nlog: /tmp/r-2.log\nshot: /tmp/a.png\ndone\n";
        let (run_id, log, shots) = extract_meta(out);
        assert_eq!(run_id, "r-2");
        assert_eq!(log, "/tmp/r-2.log");
        assert_eq!(shots, vec!["/tmp/a.png"]);
    }

    #[test]
    fn extract_meta_empty_output() {
        let (run_id, log, shots) = extract_meta("");
        assert!(run_id.is_empty());
        assert!(log.is_empty());
        assert!(shots.is_empty());
    }

    #[tokio::test]
    async fn missing_task_is_sentinel() {
        let err = BrowserTool::new("nextai-browser".into())
            .invoke_item(&serde_json::json!({ "task": "" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "browser_task_missing");
    }

    #[tokio::test]
    async fn missing_binary_is_launch_failure() {
        let err = BrowserTool::new("/nonexistent/browser-agent".into())
            .invoke_item(&serde_json::json!({ "task": "open example.com" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "browser_launch_failed");
    }
}
