//! Shell tool — run a command with a bounded timeout and capped output.

use serde::Deserialize;
use serde_json::Value;

use crate::Tool;
use nx_domain::error::{Error, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const MAX_TIMEOUT_SECS: u64 = 120;
/// Combined stdout+stderr cap.
const MAX_OUTPUT_BYTES: usize = 16 * 1024;
/// Conventional timeout exit code (matches coreutils `timeout`).
const TIMEOUT_EXIT_CODE: i32 = 124;

pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

#[derive(Debug, Deserialize)]
struct ShellItem {
    #[serde(default)]
    command: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    workdir: Option<String>,
}

pub struct ShellTool {
    enabled: bool,
}

impl ShellTool {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

/// Cap `output` at [`MAX_OUTPUT_BYTES`], appending the truncation marker.
/// The cut lands on a char boundary.
pub fn cap_output(output: &str) -> (String, bool) {
    if output.len() <= MAX_OUTPUT_BYTES {
        return (output.to_string(), false);
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    (format!("{}{}", &output[..end], TRUNCATION_MARKER), true)
}

fn clamp_timeout(requested: Option<u64>) -> u64 {
    requested
        .unwrap_or(DEFAULT_TIMEOUT_SECS)
        .clamp(1, MAX_TIMEOUT_SECS)
}

#[cfg(unix)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-lc").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[async_trait::async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> &'static str {
        "Run a shell command. Output is capped at 16 KiB; commands time out \
         after 20s by default (120s max) with exit code 124."
    }

    fn item_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_seconds": { "type": "integer", "minimum": 1, "maximum": MAX_TIMEOUT_SECS },
                "workdir": { "type": "string" },
            },
            "required": ["command"],
        })
    }

    async fn invoke_item(&self, item: &Value) -> Result<Value> {
        if !self.enabled {
            return Err(Error::tool(
                "shell_disabled",
                "the shell tool is disabled (set NEXTAI_ENABLE_SHELL_TOOL)",
            ));
        }

        let item: ShellItem = serde_json::from_value(item.clone())
            .map_err(|e| Error::tool("shell_items_invalid", e.to_string()))?;
        if item.command.trim().is_empty() {
            return Err(Error::tool("shell_command_missing", "command is required"));
        }

        let timeout_secs = clamp_timeout(item.timeout_seconds);

        let mut cmd = shell_command(&item.command);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.stdin(std::process::Stdio::null());
        cmd.kill_on_drop(true);
        if let Some(ref wd) = item.workdir {
            cmd.current_dir(wd);
        }

        let started = std::time::Instant::now();
        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            cmd.output(),
        )
        .await;

        let (exit_code, raw_output, timed_out) = match waited {
            Ok(Ok(out)) => {
                let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&out.stderr));
                (out.status.code().unwrap_or(-1), combined, false)
            }
            Ok(Err(e)) => {
                return Err(Error::tool(
                    "shell_spawn_failed",
                    format!("failed to run command: {e}"),
                ));
            }
            // Dropping the output future kills the child (kill_on_drop).
            Err(_) => (
                TIMEOUT_EXIT_CODE,
                format!("[timed out after {timeout_secs}s]"),
                true,
            ),
        };

        let (output, truncated) = cap_output(&raw_output);
        tracing::debug!(
            exit_code,
            timed_out,
            bytes = output.len(),
            "shell command finished"
        );
        let ok = exit_code == 0;
        let text = if ok {
            output.clone()
        } else {
            format!("exit {exit_code}: {output}")
        };

        Ok(serde_json::json!({
            "ok": ok,
            "exit_code": exit_code,
            "output": output,
            "truncated": truncated,
            "timed_out": timed_out,
            "duration_ms": started.elapsed().as_millis() as u64,
            "text": text,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool::new(true)
    }

    #[tokio::test]
    async fn runs_command_and_captures_output() {
        let out = tool()
            .invoke_item(&serde_json::json!({ "command": "echo hello" }))
            .await
            .unwrap();
        assert_eq!(out["ok"], true);
        assert_eq!(out["exit_code"], 0);
        assert!(out["output"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_reported() {
        let out = tool()
            .invoke_item(&serde_json::json!({ "command": "exit 3" }))
            .await
            .unwrap();
        assert_eq!(out["ok"], false);
        assert_eq!(out["exit_code"], 3);
    }

    #[tokio::test]
    async fn timeout_yields_exit_124() {
        let out = tool()
            .invoke_item(&serde_json::json!({ "command": "sleep 5", "timeout_seconds": 1 }))
            .await
            .unwrap();
        assert_eq!(out["exit_code"], 124);
        assert_eq!(out["timed_out"], true);
    }

    #[tokio::test]
    async fn missing_command_is_sentinel() {
        let err = tool()
            .invoke_item(&serde_json::json!({ "command": "  " }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "shell_command_missing");
    }

    #[tokio::test]
    async fn disabled_tool_is_sentinel() {
        let err = ShellTool::new(false)
            .invoke_item(&serde_json::json!({ "command": "echo hi" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "shell_disabled");
    }

    #[tokio::test]
    async fn large_output_is_truncated_with_marker() {
        let out = tool()
            .invoke_item(&serde_json::json!({
                "command": "head -c 20000 /dev/zero | tr '\\0' 'x'"
            }))
            .await
            .unwrap();
        assert_eq!(out["truncated"], true);
        assert!(out["output"].as_str().unwrap().ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn cap_output_respects_char_boundaries() {
        let s = "é".repeat(MAX_OUTPUT_BYTES); // 2 bytes each
        let (capped, truncated) = cap_output(&s);
        assert!(truncated);
        assert!(capped.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn timeout_clamped_to_max() {
        assert_eq!(clamp_timeout(Some(900)), MAX_TIMEOUT_SECS);
        assert_eq!(clamp_timeout(None), DEFAULT_TIMEOUT_SECS);
        assert_eq!(clamp_timeout(Some(0)), 1);
    }
}
