// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::DialogMeta;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexData {
    current_dialog_id: Option<String>,
    dialogs: Vec<DialogMeta>,
}

/// `dialogs/index.json`: the dialog list and the current-dialog pointer.
///
/// All mutations rewrite the file atomically under an in-process lock; the
/// file is small and reread cost is irrelevant next to LLM traffic.
pub struct DialogIndex {
    path: PathBuf,
    data: Mutex<IndexData>,
}

impl DialogIndex {
    pub fn open(dialogs_dir: &std::path::Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dialogs_dir)
            .with_context(|| format!("creating {}", dialogs_dir.display()))?;
        let path = dialogs_dir.join("index.json");
        let data = if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).unwrap_or_default()
        } else {
            IndexData::default()
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    fn save(&self, data: &IndexData) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn create_dialog(&self) -> anyhow::Result<DialogMeta> {
        let mut data = self.data.lock().unwrap();
        let dialog = DialogMeta::new();
        data.dialogs.push(dialog.clone());
        data.current_dialog_id = Some(dialog.id.clone());
        self.save(&data)?;
        Ok(dialog)
    }

    /// All dialogs, newest first.
    pub fn list(&self) -> Vec<DialogMeta> {
        let data = self.data.lock().unwrap();
        let mut dialogs = data.dialogs.clone();
        dialogs.sort_by(|a, b| b.id.cmp(&a.id));
        dialogs
    }

    pub fn get(&self, id: &str) -> Option<DialogMeta> {
        let data = self.data.lock().unwrap();
        data.dialogs.iter().find(|d| d.id == id).cloned()
    }

    /// The current dialog, if the pointer is set and still valid.
    pub fn current(&self) -> Option<DialogMeta> {
        let data = self.data.lock().unwrap();
        let id = data.current_dialog_id.as_ref()?;
        data.dialogs.iter().find(|d| &d.id == id).cloned()
    }

    pub fn set_current(&self, id: &str) -> anyhow::Result<DialogMeta> {
        let mut data = self.data.lock().unwrap();
        let dialog = data
            .dialogs
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .with_context(|| format!("unknown dialog: {id}"))?;
        data.current_dialog_id = Some(dialog.id.clone());
        self.save(&data)?;
        Ok(dialog)
    }

    /// Apply `update` to one dialog record and persist.
    pub fn update<F>(&self, id: &str, update: F) -> anyhow::Result<DialogMeta>
    where
        F: FnOnce(&mut DialogMeta),
    {
        let mut data = self.data.lock().unwrap();
        let dialog = data
            .dialogs
            .iter_mut()
            .find(|d| d.id == id)
            .with_context(|| format!("unknown dialog: {id}"))?;
        update(dialog);
        dialog.updated_at = Utc::now();
        let snapshot = dialog.clone();
        self.save(&data)?;
        Ok(snapshot)
    }

    pub fn delete(&self, id: &str) -> anyhow::Result<()> {
        let mut data = self.data.lock().unwrap();
        let before = data.dialogs.len();
        data.dialogs.retain(|d| d.id != id);
        if data.dialogs.len() == before {
            anyhow::bail!("unknown dialog: {id}");
        }
        if data.current_dialog_id.as_deref() == Some(id) {
            data.current_dialog_id = data.dialogs.last().map(|d| d.id.clone());
        }
        self.save(&data)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
