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

pub struct ReplaceInFileTool;

#[async_trait]
impl Tool for ReplaceInFileTool {
    fn name(&self) -> &str {
        "replace_in_file"
    }

    fn description(&self) -> &str {
        "Replaces an exact text fragment in a file. `search` must match the\n\
         file content exactly, including whitespace. By default the fragment\n\
         must be unique; pass replace_all=true to replace every occurrence.\n\
         Prefer this over write_to_file for targeted edits."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, relative to the project root"
                },
                "search": {
                    "type": "string",
                    "description": "Exact text to find"
                },
                "replace": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence (default false: search must be unique)"
                }
            },
            "required": ["path", "search", "replace"],
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
        let (raw, search, replace) = match (
            call.args.get("path").and_then(|v| v.as_str()),
            call.args.get("search").and_then(|v| v.as_str()),
            call.args.get("replace").and_then(|v| v.as_str()),
        ) {
            (Some(p), Some(s), Some(r)) => (p, s.to_string(), r.to_string()),
            _ => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Validation,
                    "missing required parameters: path, search, replace",
                )
            }
        };
        if search.is_empty() {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Validation,
                "'search' must not be empty",
            );
        }
        let replace_all = call
            .args
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let (rel, abs) = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(msg) => {
                return ToolOutput::error(&call.id, self.name(), ToolErrorCode::Permission, msg)
            }
        };

        debug!(path = %rel, replace_all, "replace_in_file tool");

        let old_text = match tokio::fs::read_to_string(&abs).await {
            Ok(t) => t,
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

        let occurrences = old_text.matches(&search).count();
        if occurrences == 0 {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Validation,
                format!("'search' text not found in {rel}"),
            );
        }
        if occurrences > 1 && !replace_all {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Validation,
                format!(
                    "'search' text matches {occurrences} locations in {rel}; \
                     add more context or set replace_all=true"
                ),
            );
        }

        let new_text = if replace_all {
            old_text.replace(&search, &replace)
        } else {
            old_text.replacen(&search, &replace, 1)
        };

        if let Err(e) = ctx.versioning.start_edit(&[abs.clone()]).await {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("edit setup failed: {e}"),
            );
        }
        if let Err(e) = tokio::fs::write(&abs, &new_text).await {
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

        let (diff, additions, deletions) = unified_diff(&rel, &old_text, &new_text);
        ctx.emit(ToolEvent::FileEdit {
            file: abs.to_string_lossy().into_owned(),
            diff: diff.clone(),
        })
        .await;
        let _ = ctx.rag.index_file(&rel).await;

        let replaced = if replace_all { occurrences } else { 1 };
        ToolOutput::ok(
            &call.id,
            json!({
                "path": rel,
                "replacements": replaced,
                "additions": additions,
                "deletions": deletions,
                "diff": diff,
            }),
            format!("Replaced {replaced} occurrence(s) in {rel}"),
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
            id: "e1".into(),
            name: "replace_in_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn replaces_unique_fragment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.py"), "x = 1\ny = 2\n").unwrap();
        let (ctx, mut rx, _cancel) = context_for(dir.path());
        let out = ReplaceInFileTool
            .execute(
                &call(json!({"path": "f.py", "search": "x = 1", "replace": "x = 42"})),
                &ctx,
            )
            .await;
        assert!(!out.is_error, "{:?}", out.result);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.py")).unwrap(),
            "x = 42\ny = 2\n"
        );
        assert!(matches!(rx.try_recv().unwrap(), ToolEvent::FileEdit { .. }));
    }

    #[tokio::test]
    async fn ambiguous_search_requires_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.py"), "a\na\n").unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = ReplaceInFileTool
            .execute(
                &call(json!({"path": "f.py", "search": "a", "replace": "b"})),
                &ctx,
            )
            .await;
        assert_eq!(out.error_code(), Some("validation"));

        let out = ReplaceInFileTool
            .execute(
                &call(json!({"path": "f.py", "search": "a", "replace": "b", "replace_all": true})),
                &ctx,
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.py")).unwrap(),
            "b\nb\n"
        );
        assert_eq!(out.result["replacements"], 2);
    }

    #[tokio::test]
    async fn unmatched_search_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.py"), "content\n").unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = ReplaceInFileTool
            .execute(
                &call(json!({"path": "f.py", "search": "absent", "replace": "x"})),
                &ctx,
            )
            .await;
        assert_eq!(out.error_code(), Some("validation"));
        // File untouched.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.py")).unwrap(),
            "content\n"
        );
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = ReplaceInFileTool
            .execute(
                &call(json!({"path": "ghost.py", "search": "a", "replace": "b"})),
                &ctx,
            )
            .await;
        assert_eq!(out.error_code(), Some("not_found"));
    }
}
