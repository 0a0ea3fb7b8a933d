// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! `status.json`: the per-project daemon state machine.
//!
//! Singleton enforcement does not use cross-process file locks: a starting
//! server reads the previous document and checks whether the recorded PID
//! is still alive.  Every write is tempfile + fsync + rename under an
//! in-process mutex, so readers never observe a torn document.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Starting,
    Ready,
    Stopping,
    Stopped,
    Error,
    Crashed,
}

impl ServerStatus {
    /// States that mean "a server owns this workdir right now".
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ServerStatus::Starting | ServerStatus::Ready | ServerStatus::Stopping
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDoc {
    pub server_status: ServerStatus,
    pub server_pid: Option<u32>,
    pub port: Option<u16>,
    pub server_started_at: Option<DateTime<Utc>>,
    pub server_updated_at: DateTime<Utc>,
    pub server_error: Option<String>,
    pub scan_status: Option<String>,
    pub config_valid: bool,
    #[serde(default)]
    pub config_errors: Vec<String>,
}

impl StatusDoc {
    fn new(status: ServerStatus) -> Self {
        Self {
            server_status: status,
            server_pid: None,
            port: None,
            server_started_at: None,
            server_updated_at: Utc::now(),
            server_error: None,
            scan_status: None,
            config_valid: true,
            config_errors: Vec::new(),
        }
    }
}

/// True when a process with `pid` exists (signal 0 probe).
pub fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

pub struct StatusFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StatusFile {
    pub fn new(state_dir: &std::path::Path) -> Self {
        Self {
            path: state_dir.join("status.json"),
            lock: Mutex::new(()),
        }
    }

    pub fn read(&self) -> Option<StatusDoc> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Atomic write: tempfile in the same directory, fsync, rename.
    pub fn write(&self, doc: &StatusDoc) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap();
        let text = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("creating {}", tmp.display()))?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming to {}", self.path.display()))?;
        Ok(())
    }

    /// Read-modify-write under the in-process lock.
    pub fn update<F>(&self, f: F) -> anyhow::Result<StatusDoc>
    where
        F: FnOnce(&mut StatusDoc),
    {
        let mut doc = self
            .read()
            .unwrap_or_else(|| StatusDoc::new(ServerStatus::Stopped));
        f(&mut doc);
        doc.server_updated_at = Utc::now();
        self.write(&doc)?;
        Ok(doc)
    }

    /// Startup reconciliation:
    ///
    /// - a live previous status with a living PID aborts startup;
    /// - a live previous status whose PID is dead is rewritten as `crashed`
    ///   (keeping the prior error) and startup continues.
    ///
    /// Returns the PID of the running server on conflict.
    pub fn check_singleton(&self) -> Result<(), u32> {
        let Some(doc) = self.read() else {
            return Ok(());
        };
        if !doc.server_status.is_live() {
            return Ok(());
        }
        match doc.server_pid {
            Some(pid) if pid_alive(pid) => Err(pid),
            _ => {
                let prior_error = doc.server_error.clone();
                let _ = self.update(|d| {
                    d.server_status = ServerStatus::Crashed;
                    d.server_error = prior_error;
                });
                Ok(())
            }
        }
    }

    /// Transition into `starting` with our identity.
    pub fn mark_starting(&self, port: u16) -> anyhow::Result<()> {
        let now = Utc::now();
        self.update(|d| {
            d.server_status = ServerStatus::Starting;
            d.server_pid = Some(std::process::id());
            d.port = Some(port);
            d.server_started_at = Some(now);
            d.server_error = None;
            d.scan_status = Some("idle".to_string());
        })
        .map(|_| ())
    }

    pub fn mark_ready(&self) -> anyhow::Result<()> {
        self.update(|d| d.server_status = ServerStatus::Ready).map(|_| ())
    }

    pub fn mark_stopping(&self) -> anyhow::Result<()> {
        self.update(|d| d.server_status = ServerStatus::Stopping).map(|_| ())
    }

    pub fn mark_stopped(&self) -> anyhow::Result<()> {
        self.update(|d| d.server_status = ServerStatus::Stopped).map(|_| ())
    }

    pub fn mark_error(&self, error: &str) -> anyhow::Result<()> {
        self.update(|d| {
            d.server_status = ServerStatus::Error;
            d.server_error = Some(error.to_string());
        })
        .map(|_| ())
    }

    pub fn set_config_state(&self, errors: Vec<String>) -> anyhow::Result<()> {
        self.update(|d| {
            d.config_valid = errors.is_empty();
            d.config_errors = errors;
        })
        .map(|_| ())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn status_file() -> (tempfile::TempDir, StatusFile) {
        let dir = tempfile::tempdir().unwrap();
        let sf = StatusFile::new(dir.path());
        (dir, sf)
    }

    #[test]
    fn missing_file_reads_as_none_and_passes_singleton_check() {
        let (_d, sf) = status_file();
        assert!(sf.read().is_none());
        assert!(sf.check_singleton().is_ok());
    }

    #[test]
    fn lifecycle_transitions_round_trip() {
        let (_d, sf) = status_file();
        sf.mark_starting(8477).unwrap();
        let doc = sf.read().unwrap();
        assert_eq!(doc.server_status, ServerStatus::Starting);
        assert_eq!(doc.server_pid, Some(std::process::id()));
        assert_eq!(doc.port, Some(8477));

        sf.mark_ready().unwrap();
        assert_eq!(sf.read().unwrap().server_status, ServerStatus::Ready);
        sf.mark_stopping().unwrap();
        sf.mark_stopped().unwrap();
        assert_eq!(sf.read().unwrap().server_status, ServerStatus::Stopped);
    }

    #[test]
    fn live_status_with_our_pid_blocks_second_startup() {
        let (_d, sf) = status_file();
        sf.mark_starting(1234).unwrap();
        // Our own PID is alive, so a "second server" must refuse.
        assert_eq!(sf.check_singleton(), Err(std::process::id()));
        // The refused startup did not modify the document.
        assert_eq!(sf.read().unwrap().server_status, ServerStatus::Starting);
    }

    #[test]
    fn dead_pid_is_rewritten_as_crashed() {
        let (_d, sf) = status_file();
        sf.mark_starting(1234).unwrap();
        sf.update(|d| {
            // A PID that cannot exist on Linux (beyond pid_max).
            d.server_pid = Some(4_190_000);
            d.server_error = Some("boom".to_string());
        })
        .unwrap();

        assert!(sf.check_singleton().is_ok());
        let doc = sf.read().unwrap();
        assert_eq!(doc.server_status, ServerStatus::Crashed);
        assert_eq!(doc.server_error.as_deref(), Some("boom"));
    }

    #[test]
    fn stopped_status_never_blocks() {
        let (_d, sf) = status_file();
        sf.mark_starting(1).unwrap();
        sf.mark_stopped().unwrap();
        assert!(sf.check_singleton().is_ok());
    }

    #[test]
    fn config_state_is_recorded() {
        let (_d, sf) = status_file();
        sf.set_config_state(vec!["no API key".into()]).unwrap();
        let doc = sf.read().unwrap();
        assert!(!doc.config_valid);
        assert_eq!(doc.config_errors, vec!["no API key"]);

        sf.set_config_state(vec![]).unwrap();
        assert!(sf.read().unwrap().config_valid);
    }

    #[test]
    fn error_keeps_document_for_diagnosis() {
        let (_d, sf) = status_file();
        sf.mark_starting(9).unwrap();
        sf.mark_error("port probe failed").unwrap();
        let doc = sf.read().unwrap();
        assert_eq!(doc.server_status, ServerStatus::Error);
        assert_eq!(doc.server_error.as_deref(), Some("port probe failed"));
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(4_190_000));
    }
}
