// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use smithy_checkpoints::unified_diff;

use crate::builtin::resolve_path;
use crate::context::ToolEvent;
use crate::tool::{Tool, ToolCall, ToolErrorCode, ToolOutput};
use crate::ToolContext;

pub struct WriteToFileTool;

#[async_trait]
impl Tool for WriteToFileTool {
    fn name(&self) -> &str {
        "write_to_file"
    }

    fn description(&self) -> &str {
        "Writes a file, overwriting any existing content at the path. Parent\n\
         directories are created automatically. ALWAYS prefer replace_in_file\n\
         for targeted changes to existing files. The write is recorded in the\n\
         dialog's checkpoint session, so it can be rolled back."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn mutates_paths(&self, args: &Value) -> Vec<String> {
        args.get("path")
            .and_then(|v| v.as_str())
            .map(|p| vec![p.to_string()])
            .unwrap_or_default()
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
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Validation,
                    "missing required parameter 'content'",
                )
            }
        };
        let (rel, abs) = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(msg) => {
                return ToolOutput::error(&call.id, self.name(), ToolErrorCode::Permission, msg)
            }
        };

        debug!(path = %rel, bytes = content.len(), "write_to_file tool");

        let old_bytes = tokio::fs::read(&abs).await.ok();
        let created = old_bytes.is_none();

        if let Err(e) = ctx.versioning.start_edit(&[abs.clone()]).await {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("edit setup failed: {e}"),
            );
        }

        if let Some(parent) = abs.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::write(&abs, &content).await {
            let _ = ctx.versioning.abort_edit().await;
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("write error: {e}"),
            );
        }

        if let Err(e) = ctx.versioning.stage_file(&abs).await {
            let _ = ctx.versioning.abort_edit().await;
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("staging failed: {e}"),
            );
        }
        ctx.versioning.finalize_edit().await;

        let old_text = old_bytes
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        let (diff, _, _) = unified_diff(&rel, &old_text, &content);
        ctx.emit(ToolEvent::FileEdit {
            file: abs.to_string_lossy().into_owned(),
            diff: diff.clone(),
        })
        .await;

        let _ = ctx.rag.index_file(&rel).await;

        ToolOutput::ok(
            &call.id,
            json!({
                "path": rel,
                "bytes_written": content.len(),
                "created": created,
                "diff": diff,
            }),
            format!("Wrote file: {rel} ({} bytes)", content.len()),
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
            id: "w1".into(),
            name: "write_to_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn write_creates_file_and_emits_file_edit() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, mut rx, _cancel) = context_for(dir.path());
        let out = WriteToFileTool
            .execute(
                &call(json!({"path": "main.py", "content": "print('hi')\n"})),
                &ctx,
            )
            .await;
        assert!(!out.is_error, "{:?}", out.result);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.py")).unwrap(),
            "print('hi')\n"
        );
        assert_eq!(out.result["created"], true);

        match rx.try_recv().unwrap() {
            ToolEvent::FileEdit { file, diff } => {
                assert!(file.ends_with("main.py"));
                assert!(diff.contains("+print('hi')"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = WriteToFileTool
            .execute(&call(json!({"path": "a/b/c.txt", "content": "nested"})), &ctx)
            .await;
        assert!(!out.is_error);
        assert!(dir.path().join("a/b/c.txt").exists());
    }

    #[tokio::test]
    async fn overwrite_reports_not_created_and_diffs_against_old() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "old\n").unwrap();
        let (ctx, mut rx, _cancel) = context_for(dir.path());
        let out = WriteToFileTool
            .execute(&call(json!({"path": "f.txt", "content": "new\n"})), &ctx)
            .await;
        assert_eq!(out.result["created"], false);
        match rx.try_recv().unwrap() {
            ToolEvent::FileEdit { diff, .. } => {
                assert!(diff.contains("-old"));
                assert!(diff.contains("+new"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn staged_write_survives_checkpoint_even_when_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), ".venv/\n").unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = WriteToFileTool
            .execute(
                &call(json!({"path": ".venv/config.py", "content": "X = 1\n"})),
                &ctx,
            )
            .await;
        assert!(!out.is_error);

        let c = ctx.versioning.create_checkpoint("after write").await.unwrap();
        std::fs::remove_file(dir.path().join(".venv/config.py")).unwrap();
        ctx.versioning.restore_checkpoint(&c).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".venv/config.py")).unwrap(),
            "X = 1\n"
        );
    }

    #[tokio::test]
    async fn missing_args_are_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = WriteToFileTool
            .execute(&call(json!({"content": "x"})), &ctx)
            .await;
        assert_eq!(out.error_code(), Some("validation"));
        let out = WriteToFileTool
            .execute(&call(json!({"path": "f.txt"})), &ctx)
            .await;
        assert_eq!(out.error_code(), Some("validation"));
    }

    #[tokio::test]
    async fn traversal_is_permission_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = WriteToFileTool
            .execute(&call(json!({"path": "../evil.txt", "content": "x"})), &ctx)
            .await;
        assert_eq!(out.error_code(), Some("permission"));
    }

    #[test]
    fn declares_mutated_path() {
        let paths = WriteToFileTool.mutates_paths(&json!({"path": "a.txt", "content": ""}));
        assert_eq!(paths, vec!["a.txt"]);
    }
}
