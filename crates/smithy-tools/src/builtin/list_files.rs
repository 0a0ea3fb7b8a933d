// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use smithy_checkpoints::walk_project;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCall, ToolErrorCode, ToolOutput};
use crate::ToolContext;

const MAX_ENTRIES: usize = 2000;

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "Lists files and directories. Non-recursive by default; pass\n\
         recursive=true for the full tree. Ignore rules (.gitignore plus the\n\
         project exclusion list) are honored in recursive mode."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the project root (default: the root)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Recurse into subdirectories (default false)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let raw = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let recursive = call
            .args
            .get("recursive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let (rel, abs) = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(_) if raw == "." => (String::new(), ctx.workdir.clone()),
            Err(msg) => {
                return ToolOutput::error(&call.id, self.name(), ToolErrorCode::Permission, msg)
            }
        };
        if !abs.is_dir() {
            let shown = if rel.is_empty() { "." } else { rel.as_str() };
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::NotFound,
                format!("no such directory: {shown}"),
            );
        }

        debug!(path = %rel, recursive, "list_files tool");

        let mut entries: Vec<Value> = Vec::new();
        if recursive {
            let prefix = if rel.is_empty() {
                String::new()
            } else {
                format!("{rel}/")
            };
            for file in walk_project(&ctx.workdir, &[]) {
                if !prefix.is_empty() && !file.starts_with(&prefix) {
                    continue;
                }
                let size = std::fs::metadata(ctx.workdir.join(&file))
                    .map(|m| m.len())
                    .unwrap_or(0);
                entries.push(json!({"path": file, "type": "file", "size": size}));
                if entries.len() >= MAX_ENTRIES {
                    break;
                }
            }
        } else {
            let read = match std::fs::read_dir(&abs) {
                Ok(r) => r,
                Err(e) => {
                    return ToolOutput::error(
                        &call.id,
                        self.name(),
                        ToolErrorCode::Exception,
                        format!("list error: {e}"),
                    )
                }
            };
            for entry in read.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = if rel.is_empty() {
                    name.clone()
                } else {
                    format!("{rel}/{name}")
                };
                let meta = entry.metadata().ok();
                let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
                entries.push(json!({
                    "path": path,
                    "type": if is_dir { "dir" } else { "file" },
                    "size": meta.map(|m| m.len()).unwrap_or(0),
                }));
                if entries.len() >= MAX_ENTRIES {
                    break;
                }
            }
            entries.sort_by(|a, b| {
                a["path"]
                    .as_str()
                    .unwrap_or("")
                    .cmp(b["path"].as_str().unwrap_or(""))
            });
        }

        let count = entries.len();
        let shown = if rel.is_empty() { "." } else { rel.as_str() };
        ToolOutput::ok(
            &call.id,
            json!({
                "path": shown,
                "recursive": recursive,
                "entries": entries,
            }),
            format!("Listed {count} entries in {shown}"),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
