// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use tracing::warn;

/// Exclusions applied regardless of configuration: VCS metadata and our own
/// state directory must never enter a checkpoint tree.
const ALWAYS_IGNORED: &[&str] = &[".git", ".hg", ".svn", ".agentsmithy"];

/// Walk the project honoring `.gitignore` plus the hardcoded and configured
/// exclusion lists.  Returns workdir-relative file paths with `/` separators.
///
/// Staged force-adds are NOT handled here; the tracker merges the staging
/// area on top of this walk when it builds a tree.
pub fn walk_project(workdir: &Path, extra_ignored: &[String]) -> Vec<String> {
    let mut overrides = OverrideBuilder::new(workdir);
    for pattern in ALWAYS_IGNORED
        .iter()
        .map(|s| s.to_string())
        .chain(extra_ignored.iter().cloned())
    {
        // In override matching a leading `!` excludes; plain patterns
        // whitelist.  All our entries are exclusions.
        let negated = format!("!{pattern}");
        if let Err(e) = overrides.add(&negated) {
            warn!(pattern = %pattern, "invalid ignore pattern: {e}");
        }
    }
    let overrides = match overrides.build() {
        Ok(o) => o,
        Err(e) => {
            warn!("failed to build ignore overrides: {e}");
            return Vec::new();
        }
    };

    let walker = WalkBuilder::new(workdir)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .overrides(overrides)
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("walk error: {e}");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(workdir) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    files
}

/// Normalize a tool-supplied path to a workdir-relative `/`-separated path.
///
/// Accepts absolute paths under the workdir and relative paths.  Rejects
/// paths that escape the workdir (`..` traversal or foreign absolute paths).
pub fn relative_to_workdir(workdir: &Path, path: &Path) -> Option<String> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    };
    // Lexical normalization; the file may not exist (deletions).
    let mut normalized = PathBuf::new();
    for comp in joined.components() {
        match comp {
            std::path::Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
            std::path::Component::CurDir => {}
            c => normalized.push(c.as_os_str()),
        }
    }
    normalized
        .strip_prefix(workdir)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        .filter(|rel| !rel.is_empty())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
