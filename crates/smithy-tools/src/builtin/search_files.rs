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

const DEFAULT_MAX_MATCHES: usize = 100;
/// Files above this size are skipped during search.
const MAX_SEARCHED_BYTES: u64 = 2_000_000;

pub struct SearchFilesTool;

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Regex search across project files. Ignore rules (.gitignore plus the\n\
         project exclusion list) are honored. pattern is a full regex;\n\
         escape literal braces. include filters by file suffix (e.g. '.rs').\n\
         Use this to locate code, then read_file for the details."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in, relative to the project root (default: the root)"
                },
                "include": {
                    "type": "string",
                    "description": "Only search files whose path ends with this suffix, e.g. '.py'"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of matches to return (default 100)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Validation,
                    "missing required parameter 'pattern'",
                )
            }
        };
        let regex = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Validation,
                    format!("invalid regex: {e}"),
                )
            }
        };
        let scope = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let include = call.args.get("include").and_then(|v| v.as_str());
        let max_results = call
            .args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_MATCHES as u64) as usize;

        let prefix = if scope == "." {
            String::new()
        } else {
            match resolve_path(ctx, scope) {
                Ok((rel, _)) => format!("{rel}/"),
                Err(msg) => {
                    return ToolOutput::error(
                        &call.id,
                        self.name(),
                        ToolErrorCode::Permission,
                        msg,
                    )
                }
            }
        };

        debug!(pattern = %pattern, scope = %scope, "search_files tool");

        let mut matches: Vec<Value> = Vec::new();
        let mut files_with_matches = 0usize;
        let mut truncated = false;

        'files: for file in walk_project(&ctx.workdir, &[]) {
            if !prefix.is_empty() && !file.starts_with(&prefix) {
                continue;
            }
            if let Some(suffix) = include {
                if !file.ends_with(suffix) {
                    continue;
                }
            }
            let disk = ctx.workdir.join(&file);
            if std::fs::metadata(&disk).map(|m| m.len()).unwrap_or(u64::MAX)
                > MAX_SEARCHED_BYTES
            {
                continue;
            }
            let bytes = match std::fs::read(&disk) {
                Ok(b) => b,
                Err(_) => continue,
            };
            if bytes[..bytes.len().min(4096)].contains(&0u8) {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes);

            let mut matched_in_file = false;
            for (line_no, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    matched_in_file = true;
                    matches.push(json!({
                        "path": file,
                        "line": line_no + 1,
                        "text": line.trim_end(),
                    }));
                    if matches.len() >= max_results {
                        truncated = true;
                        files_with_matches += 1;
                        break 'files;
                    }
                }
            }
            if matched_in_file {
                files_with_matches += 1;
            }
        }

        let k = matches.len();
        ToolOutput::ok(
            &call.id,
            json!({
                "pattern": pattern,
                "matches": matches,
                "files_with_matches": files_with_matches,
                "truncated": truncated,
            }),
            format!("Found {k} matches in {files_with_matches} files"),
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
            id: "s1".into(),
            name: "search_files".into(),
            args,
        }
    }

    fn write(dir: &std::path::Path, rel: &str, content: &str) {
        let p = dir.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "import os\nprint(os.getcwd())\n");
        write(dir.path(), "b.py", "import sys\n");
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "^import"})), &ctx)
            .await;
        assert!(!out.is_error);
        let matches = out.result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(out.result["files_with_matches"], 2);
        assert_eq!(out.summary, "Found 2 matches in 2 files");
        assert_eq!(matches[0]["line"], 1);
    }

    #[tokio::test]
    async fn include_suffix_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "target\n");
        write(dir.path(), "a.rs", "target\n");
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "target", "include": ".rs"})), &ctx)
            .await;
        let matches = out.result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["path"], "a.rs");
    }

    #[tokio::test]
    async fn gitignored_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "vendor/\n");
        write(dir.path(), "vendor/lib.py", "needle\n");
        write(dir.path(), "app.py", "needle\n");
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "needle"})), &ctx)
            .await;
        let matches = out.result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["path"], "app.py");
    }

    #[tokio::test]
    async fn max_results_truncates() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "many.txt", &"hit\n".repeat(50));
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "hit", "max_results": 10})), &ctx)
            .await;
        assert_eq!(out.result["matches"].as_array().unwrap().len(), 10);
        assert_eq!(out.result["truncated"], true);
    }

    #[tokio::test]
    async fn invalid_regex_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = SearchFilesTool
            .execute(&call(json!({"pattern": "(unclosed"})), &ctx)
            .await;
        assert_eq!(out.error_code(), Some("validation"));
    }
}
