// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCall, ToolErrorCode, ToolOutput};
use crate::ToolContext;

/// Default number of lines returned when the caller does not specify a
/// limit.  The agent can paginate with offset + limit for more.
const DEFAULT_LINE_LIMIT: usize = 500;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a file from the project. Default: first 500 lines.\n\
         Lines are numbered L{n}: (1-indexed). When more lines exist, a\n\
         pagination notice shows the next offset.\n\
         Strategy: use search_files to find the relevant region first, then\n\
         read only those lines with offset+limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 500)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let raw = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Validation,
                    "missing required parameter 'path'",
                )
            }
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        let (rel, abs) = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(msg) => {
                return ToolOutput::error(&call.id, self.name(), ToolErrorCode::Permission, msg)
            }
        };

        debug!(path = %rel, offset, limit, "read_file tool");

        let bytes = match tokio::fs::read(&abs).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::NotFound,
                    format!("no such file: {rel}"),
                )
            }
            Err(e) => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Exception,
                    format!("read error: {e}"),
                )
            }
        };

        if bytes[..bytes.len().min(4096)].contains(&0u8) {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Validation,
                format!("{rel} is a binary file"),
            );
        }

        // Index what the agent reads so later retrieval can surface it.
        let _ = ctx.rag.index_file(&rel).await;

        let text = String::from_utf8_lossy(&bytes);
        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();
        let start = offset.saturating_sub(1);

        let selected: Vec<String> = all_lines
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(i, line)| format!("L{}:{}", i + 1, line))
            .collect();
        let shown = selected.len();
        let mut content = selected.join("\n");
        if start + shown < total {
            content.push_str(&format!(
                "\n...[{} more lines; use offset={} to continue]",
                total - start - shown,
                start + shown + 1
            ));
        }

        ToolOutput::ok(
            &call.id,
            json!({
                "path": rel,
                "content": content,
                "total_lines": total,
                "offset": offset,
                "lines_shown": shown,
            }),
            format!("Read file: {rel} ({total} lines)"),
        )
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
            id: "r1".into(),
            name: "read_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn reads_numbered_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "alpha\nbeta\n").unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = ReadFileTool.execute(&call(json!({"path": "f.txt"})), &ctx).await;
        assert!(!out.is_error, "{:?}", out.result);
        let content = out.result["content"].as_str().unwrap();
        assert!(content.contains("L1:alpha"));
        assert!(content.contains("L2:beta"));
        assert_eq!(out.summary, "Read file: f.txt (2 lines)");
    }

    #[tokio::test]
    async fn pagination_with_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(dir.path().join("f.txt"), body).unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = ReadFileTool
            .execute(&call(json!({"path": "f.txt", "offset": 3, "limit": 2})), &ctx)
            .await;
        let content = out.result["content"].as_str().unwrap();
        assert!(content.starts_with("L3:line3\nL4:line4"));
        assert!(content.contains("use offset=5"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = ReadFileTool.execute(&call(json!({"path": "nope.txt"})), &ctx).await;
        assert_eq!(out.error_code(), Some("not_found"));
    }

    #[tokio::test]
    async fn missing_path_arg_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = ReadFileTool.execute(&call(json!({})), &ctx).await;
        assert_eq!(out.error_code(), Some("validation"));
    }

    #[tokio::test]
    async fn traversal_is_permission_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = ReadFileTool
            .execute(&call(json!({"path": "../outside.txt"})), &ctx)
            .await;
        assert_eq!(out.error_code(), Some("permission"));
    }
}
