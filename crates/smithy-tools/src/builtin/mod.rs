// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod delete_file;
mod get_tool_result;
mod list_files;
mod read_file;
mod replace_in_file;
mod run_command;
mod search_files;
mod web_fetch;
mod web_search;
mod write_to_file;

pub use delete_file::DeleteFileTool;
pub use get_tool_result::GetToolResultTool;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use replace_in_file::ReplaceInFileTool;
pub use run_command::RunCommandTool;
pub use search_files::SearchFilesTool;
pub use web_fetch::WebFetchTool;
pub use web_search::WebSearchTool;
pub use write_to_file::WriteToFileTool;

use std::path::PathBuf;

use crate::ToolContext;

/// Resolve a tool-supplied path against the workdir, rejecting traversal.
/// Returns `(relative, absolute)` on success, a message for a
/// `permission` tool error otherwise.
pub(crate) fn resolve_path(ctx: &ToolContext, raw: &str) -> Result<(String, PathBuf), String> {
    match smithy_checkpoints::relative_to_workdir(&ctx.workdir, std::path::Path::new(raw)) {
        Some(rel) => {
            let abs = ctx.workdir.join(&rel);
            Ok((rel, abs))
        }
        None => Err(format!("path escapes the project root: {raw}")),
    }
}

/// Register the standard tool set.
pub fn register_builtin(registry: &mut crate::ToolRegistry) {
    registry.register(ReadFileTool);
    registry.register(WriteToFileTool);
    registry.register(ReplaceInFileTool);
    registry.register(DeleteFileTool);
    registry.register(ListFilesTool);
    registry.register(SearchFilesTool);
    registry.register(RunCommandTool);
    registry.register(WebSearchTool::default());
    registry.register(WebFetchTool);
    registry.register(GetToolResultTool);
}
