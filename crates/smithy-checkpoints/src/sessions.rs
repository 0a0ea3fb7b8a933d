// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Merged,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_name: String,
    pub ref_name: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub approved_commit: Option<String>,
    pub checkpoints_count: u32,
}

impl SessionRecord {
    pub fn new(number: u32) -> Self {
        let name = format!("session_{number}");
        Self {
            session_name: name.clone(),
            ref_name: name,
            status: SessionStatus::Active,
            created_at: Utc::now(),
            closed_at: None,
            approved_commit: None,
            checkpoints_count: 0,
        }
    }
}

/// Session bookkeeping for one dialog, persisted as `metadata.json` next to
/// the object store.  Invariant: exactly one session has `status = active`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionMeta {
    pub active_session: String,
    pub last_approved_at: Option<DateTime<Utc>>,
    pub sessions: Vec<SessionRecord>,
    #[serde(skip)]
    path: PathBuf,
}

impl SessionMeta {
    /// Load existing metadata or initialize with `session_1` active.
    pub fn load_or_init(path: PathBuf) -> anyhow::Result<Self> {
        if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let mut meta: SessionMeta =
                serde_json::from_str(&text).with_context(|| "parsing session metadata")?;
            meta.path = path;
            Ok(meta)
        } else {
            let first = SessionRecord::new(1);
            let meta = Self {
                active_session: first.session_name.clone(),
                last_approved_at: None,
                sessions: vec![first],
                path,
            };
            meta.save()?;
            Ok(meta)
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn active(&self) -> &SessionRecord {
        self.sessions
            .iter()
            .find(|s| s.session_name == self.active_session)
            .expect("active session record always exists")
    }

    pub fn active_mut(&mut self) -> &mut SessionRecord {
        let name = self.active_session.clone();
        self.sessions
            .iter_mut()
            .find(|s| s.session_name == name)
            .expect("active session record always exists")
    }

    /// Close the active session with the given terminal status and start the
    /// next numbered session.  Returns the new session name.
    pub fn rotate(
        &mut self,
        status: SessionStatus,
        approved_commit: Option<String>,
    ) -> anyhow::Result<String> {
        debug_assert!(status != SessionStatus::Active);
        let next_number = self.sessions.len() as u32 + 1;
        {
            let current = self.active_mut();
            current.status = status;
            current.closed_at = Some(Utc::now());
            current.approved_commit = approved_commit;
        }
        let next = SessionRecord::new(next_number);
        self.active_session = next.session_name.clone();
        self.sessions.push(next);
        if status == SessionStatus::Merged {
            self.last_approved_at = Some(Utc::now());
        }
        self.save()?;
        Ok(self.active_session.clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
