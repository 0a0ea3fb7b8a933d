// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::Serialize;
use similar::TextDiff;

/// Files larger than this are reported without diff or base content.
const MAX_TEXT_BYTES: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

/// One entry in the session's pending-change list.
#[derive(Debug, Clone, Serialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: ChangeStatus,
    pub additions: usize,
    pub deletions: usize,
    /// Unified diff with `--- a/<path>` / `+++ b/<path>` headers.
    /// `None` for binary or oversized files.
    pub diff: Option<String>,
    /// Content at the `main` tip.  `None` when added, binary, or over 1 MB.
    pub base_content: Option<String>,
    pub is_binary: bool,
    pub is_too_large: bool,
}

/// Same heuristic as git: a null byte in the first 4 KB means binary.
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(4096)].contains(&0u8)
}

/// Unified diff between two texts with standard a/ b/ headers.
/// Returns the diff text plus added/removed line counts.
pub fn unified_diff(path: &str, old: &str, new: &str) -> (String, usize, usize) {
    let diff = TextDiff::from_lines(old, new);
    let mut additions = 0;
    let mut deletions = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Insert => additions += 1,
            similar::ChangeTag::Delete => deletions += 1,
            similar::ChangeTag::Equal => {}
        }
    }
    let text = diff
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string();
    (text, additions, deletions)
}

/// Classify the difference between a base version and the current version of
/// one path.  Returns `None` when the two are byte-identical (or both absent).
pub fn changed_file(
    path: &str,
    base: Option<&[u8]>,
    current: Option<&[u8]>,
) -> Option<ChangedFile> {
    let status = match (base, current) {
        (None, None) => return None,
        (None, Some(_)) => ChangeStatus::Added,
        (Some(_), None) => ChangeStatus::Deleted,
        (Some(b), Some(c)) if b == c => return None,
        (Some(_), Some(_)) => ChangeStatus::Modified,
    };

    let binary =
        base.map(is_binary).unwrap_or(false) || current.map(is_binary).unwrap_or(false);
    let too_large = base.map(|b| b.len() > MAX_TEXT_BYTES).unwrap_or(false)
        || current.map(|c| c.len() > MAX_TEXT_BYTES).unwrap_or(false);

    if binary || too_large {
        return Some(ChangedFile {
            path: path.to_string(),
            status,
            additions: 0,
            deletions: 0,
            diff: None,
            base_content: None,
            is_binary: binary,
            is_too_large: too_large,
        });
    }

    let old = base
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();
    let new = current
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .unwrap_or_default();
    let (diff, additions, deletions) = unified_diff(path, &old, &new);

    Some(ChangedFile {
        path: path.to_string(),
        status,
        additions,
        deletions,
        diff: Some(diff),
        base_content: match status {
            ChangeStatus::Added => None,
            _ => Some(old),
        },
        is_binary: false,
        is_too_large: false,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
