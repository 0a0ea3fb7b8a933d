// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use crate::chat::CodeContext;

/// Build the system prompt for one project.
///
/// The prompt is stable within a session: project root, OS, shell, and the
/// IDE identifier the client announced at startup.  Volatile per-turn data
/// (code context, retrieved chunks) is appended by the chat service as a
/// separate block.
pub fn system_prompt(workdir: &Path, ide: Option<&str>) -> String {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let ide_note = match ide {
        Some(ide) => format!("The user is working in {ide}.\n"),
        None => String::new(),
    };
    format!(
        "You are AgentSmithy, a coding assistant working on the project at\n\
         {workdir}.\n\
         Operating system: {os}. Shell: {shell}.\n\
         {ide_note}\
         \n\
         You change the project by calling tools. Rules:\n\
         - Read before you write: inspect files with read_file and\n\
           search_files before editing them.\n\
         - Prefer replace_in_file for targeted edits; write_to_file only for\n\
           new files or full rewrites.\n\
         - Use run_command for builds, tests, and git — never for file\n\
           operations.\n\
         - Tool results in the history are truncated; use get_tool_result\n\
           with a tool call id to re-read a full earlier result.\n\
         - Every file change is checkpointed and can be rolled back by the\n\
           user; do not create backup copies of files yourself.\n\
         - When the task is done, summarize what changed in one or two\n\
           sentences.",
        workdir = workdir.display(),
        os = std::env::consts::OS,
    )
}

/// Format the editor context sent with the request into a prompt block.
pub fn format_code_context(ctx: &CodeContext) -> Option<String> {
    let mut out = String::new();
    if let Some(current) = &ctx.current_file {
        out.push_str(&format!(
            "The user has {} open{}:\n```{}\n{}\n```\n",
            current.path,
            current
                .selection
                .as_deref()
                .map(|_| " with a selection")
                .unwrap_or(""),
            current.language.as_deref().unwrap_or(""),
            current.content.as_deref().unwrap_or(""),
        ));
        if let Some(selection) = &current.selection {
            out.push_str(&format!("Selected text:\n```\n{selection}\n```\n"));
        }
    }
    if !ctx.open_files.is_empty() {
        let names: Vec<&str> = ctx.open_files.iter().map(|f| f.path.as_str()).collect();
        out.push_str(&format!("Other open files: {}\n", names.join(", ")));
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Truncate a user query for checkpoint messages.
pub fn truncate_query(query: &str, max_chars: usize) -> String {
    if query.chars().count() <= max_chars {
        return query.to_string();
    }
    let cut: String = query.chars().take(max_chars).collect();
    format!("{cut}…")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
