// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// One staged entry: an addition (force-included even when ignored) or a
/// deletion of a previously tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StagedChange {
    Add { content_hash: String },
    Remove,
}

/// Per-session staging area, persisted so a server restart keeps pending
/// force-adds.  Cleared atomically on checkpoint creation and on restore.
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    entries: BTreeMap<String, StagedChange>,
}

impl StagingArea {
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let entries = if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    pub fn insert(&mut self, rel_path: String, change: StagedChange) -> anyhow::Result<()> {
        self.entries.insert(rel_path, change);
        self.save()
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.entries.clear();
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("removing {}", self.path.display()))?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &BTreeMap<String, StagedChange> {
        &self.entries
    }

    pub fn added_paths(&self) -> impl Iterator<Item = &String> {
        self.entries
            .iter()
            .filter(|(_, c)| matches!(c, StagedChange::Add { .. }))
            .map(|(p, _)| p)
    }

    pub fn removed_paths(&self) -> impl Iterator<Item = &String> {
        self.entries
            .iter()
            .filter(|(_, c)| matches!(c, StagedChange::Remove))
            .map(|(p, _)| p)
    }

    fn save(&self) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
