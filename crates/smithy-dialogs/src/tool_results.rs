// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use anyhow::Context;

use crate::ToolResultMeta;

/// Out-of-band storage for full tool results.
///
/// The message history only keeps a lazy reference; the complete structured
/// JSON lives in `dialogs/<dialog_id>/tool_results/<tool_call_id>.json` with
/// a sibling `.meta.json` carrying the metadata for directory listings.
#[derive(Clone)]
pub struct ToolResultStore {
    dialogs_dir: PathBuf,
}

impl ToolResultStore {
    pub fn new(dialogs_dir: impl Into<PathBuf>) -> Self {
        Self {
            dialogs_dir: dialogs_dir.into(),
        }
    }

    fn dir_for(&self, dialog_id: &str) -> PathBuf {
        self.dialogs_dir.join(dialog_id).join("tool_results")
    }

    /// Reject ids that could escape the store directory.  Providers generate
    /// ids matching `[A-Za-z0-9_-]+`; anything else is suspect.
    fn safe_id(id: &str) -> anyhow::Result<&str> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            anyhow::bail!("invalid tool call id: {id:?}");
        }
        Ok(id)
    }

    pub fn save(
        &self,
        meta: &ToolResultMeta,
        result: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let id = Self::safe_id(&meta.tool_call_id)?;
        let dir = self.dir_for(&meta.dialog_id);
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        std::fs::write(
            dir.join(format!("{id}.json")),
            serde_json::to_string_pretty(result)?,
        )?;
        std::fs::write(
            dir.join(format!("{id}.meta.json")),
            serde_json::to_string_pretty(meta)?,
        )?;
        Ok(())
    }

    pub fn load(
        &self,
        dialog_id: &str,
        tool_call_id: &str,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        let id = Self::safe_id(tool_call_id)?;
        let path = self.dir_for(dialog_id).join(format!("{id}.json"));
        if !path.is_file() {
            return Ok(None);
        }
        let text =
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn load_meta(
        &self,
        dialog_id: &str,
        tool_call_id: &str,
    ) -> anyhow::Result<Option<ToolResultMeta>> {
        let id = Self::safe_id(tool_call_id)?;
        let path = self.dir_for(dialog_id).join(format!("{id}.meta.json"));
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn meta(id: &str) -> ToolResultMeta {
        ToolResultMeta {
            tool_call_id: id.to_string(),
            dialog_id: "d1".into(),
            tool_name: "run_command".into(),
            status: "ok".into(),
            size_bytes: 17,
            summary: "Exit 0, 5 chars".into(),
            preview: "hello".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolResultStore::new(dir.path());
        let result = serde_json::json!({"stdout": "hello", "exit_code": 0});
        store.save(&meta("call_abc"), &result).unwrap();

        let loaded = store.load("d1", "call_abc").unwrap().unwrap();
        assert_eq!(loaded["stdout"], "hello");
        let m = store.load_meta("d1", "call_abc").unwrap().unwrap();
        assert_eq!(m.size_bytes, 17);
    }

    #[test]
    fn missing_result_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolResultStore::new(dir.path());
        assert!(store.load("d1", "nope").unwrap().is_none());
        assert!(store.load_meta("d1", "nope").unwrap().is_none());
    }

    #[test]
    fn traversal_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ToolResultStore::new(dir.path());
        assert!(store.load("d1", "../../etc/passwd").is_err());
        assert!(store.load("d1", "").is_err());
    }
}
