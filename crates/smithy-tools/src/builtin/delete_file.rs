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

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Deletes a file from the project. The deletion is recorded in the\n\
         dialog's checkpoint session and can be rolled back via restore."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                }
            },
            "required": ["path"],
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
        let (rel, abs) = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(msg) => {
                return ToolOutput::error(&call.id, self.name(), ToolErrorCode::Permission, msg)
            }
        };

        debug!(path = %rel, "delete_file tool");

        let old_bytes = match tokio::fs::read(&abs).await {
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

        if let Err(e) = ctx.versioning.start_edit(&[abs.clone()]).await {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("edit setup failed: {e}"),
            );
        }
        if let Err(e) = tokio::fs::remove_file(&abs).await {
            let _ = ctx.versioning.abort_edit().await;
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("delete error: {e}"),
            );
        }
        if let Err(e) = ctx.versioning.stage_file_deletion(&abs).await {
            let _ = ctx.versioning.abort_edit().await;
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("staging failed: {e}"),
            );
        }
        ctx.versioning.finalize_edit().await;

        let old_text = String::from_utf8_lossy(&old_bytes).into_owned();
        let (diff, _, deletions) = unified_diff(&rel, &old_text, "");
        ctx.emit(ToolEvent::FileEdit {
            file: abs.to_string_lossy().into_owned(),
            diff: diff.clone(),
        })
        .await;
        let _ = ctx.rag.remove_file(&rel).await;

        ToolOutput::ok(
            &call.id,
            json!({
                "path": rel,
                "deleted": true,
                "lines_removed": deletions,
            }),
            format!("Deleted file: {rel}"),
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
            id: "d1".into(),
            name: "delete_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn deletes_and_emits_file_edit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gone.txt"), "bye\n").unwrap();
        let (ctx, mut rx, _cancel) = context_for(dir.path());
        let out = DeleteFileTool
            .execute(&call(json!({"path": "gone.txt"})), &ctx)
            .await;
        assert!(!out.is_error, "{:?}", out.result);
        assert!(!dir.path().join("gone.txt").exists());
        assert_eq!(out.summary, "Deleted file: gone.txt");
        match rx.try_recv().unwrap() {
            ToolEvent::FileEdit { diff, .. } => assert!(diff.contains("-bye")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn deletion_is_restorable_through_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "precious\n").unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let before = ctx.versioning.create_checkpoint("before").await.unwrap();

        let out = DeleteFileTool
            .execute(&call(json!({"path": "keep.txt"})), &ctx)
            .await;
        assert!(!out.is_error);

        ctx.versioning.restore_checkpoint(&before).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("keep.txt")).unwrap(),
            "precious\n"
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = DeleteFileTool
            .execute(&call(json!({"path": "ghost.txt"})), &ctx)
            .await;
        assert_eq!(out.error_code(), Some("not_found"));
    }

    #[tokio::test]
    async fn traversal_is_permission_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = DeleteFileTool
            .execute(&call(json!({"path": "/etc/passwd"})), &ctx)
            .await;
        assert_eq!(out.error_code(), Some("permission"));
    }
}
