// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;

use crate::objects::{
    hash_object, parse_commit, parse_tree, serialize_commit, serialize_tree, Commit, EntryKind,
    TreeEntry,
};

/// On-disk object store + refs for one dialog.
///
/// Layout under the dialog's `checkpoints/` directory:
///
/// ```text
/// objects/<hh>/<rest-of-hash>
/// refs/{main, session_N}
/// ```
pub struct CheckpointRepo {
    root: PathBuf,
}

impl CheckpointRepo {
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("objects"))
            .with_context(|| format!("creating {}", root.display()))?;
        std::fs::create_dir_all(root.join("refs"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.root.join("objects").join(&hash[..2]).join(&hash[2..])
    }

    fn write_object(&self, kind: &str, data: &[u8]) -> anyhow::Result<String> {
        let hash = hash_object(kind, data);
        let path = self.object_path(&hash);
        if !path.exists() {
            std::fs::create_dir_all(path.parent().unwrap())?;
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)?;
        }
        Ok(hash)
    }

    fn read_object(&self, hash: &str) -> anyhow::Result<Vec<u8>> {
        if hash.len() < 3 {
            anyhow::bail!("malformed object hash: {hash}");
        }
        std::fs::read(self.object_path(hash)).with_context(|| format!("reading object {hash}"))
    }

    pub fn has_object(&self, hash: &str) -> bool {
        hash.len() >= 3 && self.object_path(hash).exists()
    }

    // ── Blobs ─────────────────────────────────────────────────────────────────

    pub fn write_blob(&self, data: &[u8]) -> anyhow::Result<String> {
        self.write_object("blob", data)
    }

    pub fn read_blob(&self, hash: &str) -> anyhow::Result<Vec<u8>> {
        self.read_object(hash)
    }

    // ── Trees ─────────────────────────────────────────────────────────────────

    /// Write a (possibly nested) tree from a flat map of relative file path
    /// (`/`-separated) to blob hash.  Returns the root tree hash.
    pub fn write_tree(&self, files: &BTreeMap<String, String>) -> anyhow::Result<String> {
        // Split the flat map into this level's blobs and child directories.
        let mut blobs: Vec<TreeEntry> = Vec::new();
        let mut children: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

        for (path, hash) in files {
            match path.split_once('/') {
                None => blobs.push(TreeEntry {
                    mode: 0o100644,
                    kind: EntryKind::Blob,
                    hash: hash.clone(),
                    name: path.clone(),
                }),
                Some((dir, rest)) => {
                    children
                        .entry(dir.to_string())
                        .or_default()
                        .insert(rest.to_string(), hash.clone());
                }
            }
        }

        let mut entries = blobs;
        for (dir, subfiles) in children {
            let sub_hash = self.write_tree(&subfiles)?;
            entries.push(TreeEntry {
                mode: 0o040000,
                kind: EntryKind::Tree,
                hash: sub_hash,
                name: dir,
            });
        }

        self.write_object("tree", &serialize_tree(&entries))
    }

    /// Flatten a tree into a map of relative file path to blob hash.
    pub fn read_tree(&self, tree_hash: &str) -> anyhow::Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        self.read_tree_into(tree_hash, "", &mut out)?;
        Ok(out)
    }

    fn read_tree_into(
        &self,
        tree_hash: &str,
        prefix: &str,
        out: &mut BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let entries = parse_tree(&self.read_object(tree_hash)?)?;
        for e in entries {
            let path = if prefix.is_empty() {
                e.name.clone()
            } else {
                format!("{prefix}/{}", e.name)
            };
            match e.kind {
                EntryKind::Blob => {
                    out.insert(path, e.hash);
                }
                EntryKind::Tree => self.read_tree_into(&e.hash, &path, out)?,
            }
        }
        Ok(())
    }

    // ── Commits ───────────────────────────────────────────────────────────────

    pub fn write_commit(
        &self,
        tree: String,
        parent: Option<String>,
        message: String,
    ) -> anyhow::Result<String> {
        let commit = Commit {
            tree,
            parent,
            message,
            author_time: Utc::now(),
        };
        self.write_object("commit", &serialize_commit(&commit))
    }

    pub fn read_commit(&self, hash: &str) -> anyhow::Result<Commit> {
        parse_commit(&self.read_object(hash)?)
    }

    /// History reachable from `tip`, oldest first, as `(commit_id, message)`.
    pub fn log_from(&self, tip: &str) -> anyhow::Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        let mut cursor = Some(tip.to_string());
        while let Some(id) = cursor {
            let commit = self.read_commit(&id)?;
            out.push((id, commit.message));
            cursor = commit.parent;
        }
        out.reverse();
        Ok(out)
    }

    /// Number of commits reachable from `tip` but not from `until`
    /// (exclusive).  `until = None` counts the whole chain.
    pub fn count_since(&self, tip: &str, until: Option<&str>) -> anyhow::Result<usize> {
        let mut count = 0;
        let mut cursor = Some(tip.to_string());
        while let Some(id) = cursor {
            if Some(id.as_str()) == until {
                break;
            }
            count += 1;
            cursor = self.read_commit(&id)?.parent;
        }
        Ok(count)
    }

    // ── Refs ──────────────────────────────────────────────────────────────────

    pub fn read_ref(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join("refs").join(name))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn write_ref(&self, name: &str, commit_id: &str) -> anyhow::Result<()> {
        let path = self.root.join("refs").join(name);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, format!("{commit_id}\n"))?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
