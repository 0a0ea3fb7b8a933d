// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Object model for the content-addressed store.
//!
//! Three object kinds: blobs (file bytes), trees (sorted directory
//! listings), commits (tree + parent + message).  Hashes are SHA-1 over
//! `"<kind> <len>\0" + body`, so two independent stores of the same project
//! state produce identical ids.

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};

/// Hash an object body with its kind header.
pub fn hash_object(kind: &str, data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_bytes());
    hasher.update(b" ");
    hasher.update(data.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
}

impl EntryKind {
    fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Blob => "blob",
            EntryKind::Tree => "tree",
        }
    }
}

/// One entry in a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: u32,
    pub kind: EntryKind,
    pub hash: String,
    pub name: String,
}

/// Serialize tree entries into the canonical text body.
///
/// Entries are sorted by name so the hash is deterministic regardless of
/// walk order.  Names must be single path components.
pub fn serialize_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let mut out = String::new();
    for e in sorted {
        out.push_str(&format!(
            "{:06o} {} {}\t{}\n",
            e.mode,
            e.kind.as_str(),
            e.hash,
            e.name
        ));
    }
    out.into_bytes()
}

pub fn parse_tree(body: &[u8]) -> anyhow::Result<Vec<TreeEntry>> {
    let text = std::str::from_utf8(body)?;
    let mut entries = Vec::new();
    for line in text.lines() {
        let (meta, name) = line
            .split_once('\t')
            .ok_or_else(|| anyhow::anyhow!("malformed tree entry: {line}"))?;
        let mut parts = meta.split(' ');
        let mode = u32::from_str_radix(parts.next().unwrap_or(""), 8)?;
        let kind = match parts.next() {
            Some("blob") => EntryKind::Blob,
            Some("tree") => EntryKind::Tree,
            other => anyhow::bail!("unknown tree entry kind: {other:?}"),
        };
        let hash = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("tree entry missing hash: {line}"))?
            .to_string();
        entries.push(TreeEntry {
            mode,
            kind,
            hash,
            name: name.to_string(),
        });
    }
    Ok(entries)
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub tree: String,
    pub parent: Option<String>,
    pub message: String,
    pub author_time: DateTime<Utc>,
}

pub fn serialize_commit(commit: &Commit) -> Vec<u8> {
    let mut out = format!("tree {}\n", commit.tree);
    if let Some(p) = &commit.parent {
        out.push_str(&format!("parent {p}\n"));
    }
    out.push_str(&format!("time {}\n\n", commit.author_time.to_rfc3339()));
    out.push_str(&commit.message);
    out.into_bytes()
}

pub fn parse_commit(body: &[u8]) -> anyhow::Result<Commit> {
    let text = std::str::from_utf8(body)?;
    let (header, message) = text
        .split_once("\n\n")
        .ok_or_else(|| anyhow::anyhow!("malformed commit: missing body separator"))?;
    let mut tree = None;
    let mut parent = None;
    let mut author_time = None;
    for line in header.lines() {
        if let Some(h) = line.strip_prefix("tree ") {
            tree = Some(h.to_string());
        } else if let Some(h) = line.strip_prefix("parent ") {
            parent = Some(h.to_string());
        } else if let Some(t) = line.strip_prefix("time ") {
            author_time = Some(DateTime::parse_from_rfc3339(t)?.with_timezone(&Utc));
        }
    }
    Ok(Commit {
        tree: tree.ok_or_else(|| anyhow::anyhow!("commit missing tree"))?,
        parent,
        message: message.to_string(),
        author_time: author_time.ok_or_else(|| anyhow::anyhow!("commit missing time"))?,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
