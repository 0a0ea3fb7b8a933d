// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolErrorCode, ToolOutput};
use crate::ToolContext;

const OUTPUT_LIMIT: usize = 100_000;

pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Executes a shell command in the project directory.\n\n\
         IMPORTANT: This tool is for terminal operations like git, cargo,\n\
         pytest, make. DO NOT use it for file operations — use the\n\
         specialized tools instead:\n\
         - DO NOT use cat, head, tail → use read_file\n\
         - DO NOT use grep or find    → use search_files and list_files\n\
         - DO NOT use sed or awk      → use replace_in_file\n\n\
         Output is limited to 100,000 characters. The default timeout is\n\
         configurable; pass timeout_secs for slow builds or tests.\n\
         Avoid persistent servers or watchers; prefer one-shot commands.\n\
         Files changed by a command are picked up by the next checkpoint."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn takes_workdir_lock(&self) -> bool {
        true
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Validation,
                    "missing required parameter 'command'",
                )
            }
        };
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(std::time::Duration::from_secs)
            .unwrap_or(ctx.command_timeout);

        debug!(cmd = %command, timeout_secs = timeout.as_secs(), "run_command tool");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&ctx.workdir)
            .kill_on_drop(true);

        let started = std::time::Instant::now();
        let mut cancel = ctx.cancel.clone();

        let output = tokio::select! {
            result = tokio::time::timeout(timeout, cmd.output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return ToolOutput::error(
                        &call.id,
                        self.name(),
                        ToolErrorCode::ExecFailed,
                        format!("spawn error: {e}"),
                    )
                }
                Err(_) => {
                    return ToolOutput::error(
                        &call.id,
                        self.name(),
                        ToolErrorCode::Timeout,
                        format!("command timed out after {}s", timeout.as_secs()),
                    )
                }
            },
            _ = wait_cancelled(&mut cancel) => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Cancelled,
                    "command cancelled",
                )
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
        let total_len = stdout.len() + stderr.len();

        ToolOutput::ok(
            &call.id,
            json!({
                "command": command,
                "exit_code": exit_code,
                "stdout": stdout,
                "stderr": stderr,
                "duration_ms": started.elapsed().as_millis() as u64,
            }),
            format!("Exit {exit_code}, {total_len} chars"),
        )
    }
}

/// Resolve when the cancel flag flips to true.  A dropped sender keeps the
/// command running to completion rather than spuriously cancelling it.
async fn wait_cancelled(cancel: &mut tokio::sync::watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT {
        s.to_string()
    } else {
        let mut cut = OUTPUT_LIMIT;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...[truncated {} bytes]", &s[..cut], s.len() - cut)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::context::test_support::context_for;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: "run_command".into(),
            args,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = RunCommandTool
            .execute(&call(json!({"command": "echo hello"})), &ctx)
            .await;
        assert!(!out.is_error);
        assert_eq!(out.result["exit_code"], 0);
        assert!(out.result["stdout"].as_str().unwrap().contains("hello"));
        assert!(out.summary.starts_with("Exit 0, "));
    }

    #[tokio::test]
    async fn captures_stderr_and_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = RunCommandTool
            .execute(&call(json!({"command": "echo err >&2; exit 3"})), &ctx)
            .await;
        // Non-zero exit is data, not a tool error; the model inspects it.
        assert!(!out.is_error);
        assert_eq!(out.result["exit_code"], 3);
        assert!(out.result["stderr"].as_str().unwrap().contains("err"));
    }

    #[tokio::test]
    async fn runs_in_the_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("here.txt"), "x").unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = RunCommandTool
            .execute(&call(json!({"command": "ls"})), &ctx)
            .await;
        assert!(out.result["stdout"].as_str().unwrap().contains("here.txt"));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_timeout_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = RunCommandTool
            .execute(&call(json!({"command": "sleep 30", "timeout_secs": 1})), &ctx)
            .await;
        assert!(out.is_error);
        assert_eq!(out.error_code(), Some("timeout"));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, cancel_tx) = context_for(dir.path());
        let task = tokio::spawn(async move {
            RunCommandTool
                .execute(&call(json!({"command": "sleep 30"})), &ctx)
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();
        let out = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("cancel must interrupt promptly")
            .unwrap();
        assert_eq!(out.error_code(), Some("cancelled"));
    }

    #[tokio::test]
    async fn missing_command_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = RunCommandTool.execute(&call(json!({})), &ctx).await;
        assert_eq!(out.error_code(), Some("validation"));
    }

    #[test]
    fn takes_the_workdir_lock() {
        assert!(RunCommandTool.takes_workdir_lock());
    }
}
