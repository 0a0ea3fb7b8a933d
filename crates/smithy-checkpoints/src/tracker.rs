// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-dialog versioning: checkpoints, sessions, staging, edit scopes.
//!
//! All operations for one dialog are serialized behind a single async mutex;
//! the tracker is shared as `Arc<VersioningTracker>` between the chat
//! service, the tools, and the HTTP handlers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::diff::{changed_file, ChangedFile};
use crate::filter::{relative_to_workdir, walk_project};
use crate::sessions::{SessionMeta, SessionStatus};
use crate::staging::{StagedChange, StagingArea};
use crate::store::CheckpointRepo;

/// Typed failure for id lookups so the HTTP layer can map to 404.
#[derive(Debug, thiserror::Error)]
#[error("checkpoint not found: {0}")]
pub struct CheckpointNotFound(pub String);

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored_to: String,
    pub new_checkpoint: String,
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApproveOutcome {
    pub approved_commit: String,
    pub new_session: String,
    pub commits_approved: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    pub reset_to: String,
    pub new_session: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub active_session: String,
    pub session_ref: String,
    pub has_unapproved: bool,
    pub last_approved_at: Option<DateTime<Utc>>,
    pub changed_files: Vec<ChangedFile>,
}

struct TrackerState {
    workdir: PathBuf,
    repo: CheckpointRepo,
    staging: StagingArea,
    meta: SessionMeta,
    extra_ignored: Vec<String>,
    /// start_edit snapshots: rel path → original bytes (None = did not exist).
    edit_cache: HashMap<String, Option<Vec<u8>>>,
}

pub struct VersioningTracker {
    state: Mutex<TrackerState>,
}

impl VersioningTracker {
    /// Open (or initialize) the tracker for one dialog.
    ///
    /// `checkpoints_dir` is the dialog's `checkpoints/` directory; the
    /// object store, refs, staging file, and session metadata live inside.
    pub fn open(
        workdir: &Path,
        checkpoints_dir: &Path,
        extra_ignored: Vec<String>,
    ) -> anyhow::Result<Self> {
        let repo = CheckpointRepo::open(checkpoints_dir)?;
        let staging = StagingArea::load(checkpoints_dir.join("staging.json"))?;
        let meta = SessionMeta::load_or_init(checkpoints_dir.join("metadata.json"))?;
        Ok(Self {
            state: Mutex::new(TrackerState {
                workdir: workdir.to_path_buf(),
                repo,
                staging,
                meta,
                extra_ignored,
                edit_cache: HashMap::new(),
            }),
        })
    }

    // ── Checkpoints ───────────────────────────────────────────────────────────

    /// Snapshot the current project state onto the active session.
    ///
    /// When the resulting tree is identical to the session tip's tree no new
    /// commit is created and the tip id is returned unchanged.  Staging is
    /// cleared either way.
    pub async fn create_checkpoint(&self, message: &str) -> anyhow::Result<String> {
        let mut state = self.state.lock().await;
        create_checkpoint_locked(&mut state, message)
    }

    /// Record a force-add for `path`: the file enters the next checkpoint
    /// tree even when an ignore rule would exclude it.
    pub async fn stage_file(&self, path: &Path) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let rel = rel_or_err(&state.workdir, path)?;
        let bytes = std::fs::read(state.workdir.join(&rel))
            .with_context(|| format!("reading {rel} for staging"))?;
        let content_hash = state.repo.write_blob(&bytes)?;
        debug!(path = %rel, hash = %content_hash, "staged file");
        state.staging.insert(rel, StagedChange::Add { content_hash })
    }

    /// Record a staged deletion so an ignored or previously force-added path
    /// drops out of the next checkpoint tree.
    pub async fn stage_file_deletion(&self, path: &Path) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let rel = rel_or_err(&state.workdir, path)?;
        debug!(path = %rel, "staged deletion");
        state.staging.insert(rel, StagedChange::Remove)
    }

    /// History reachable from the current session tip, oldest first.
    pub async fn list_checkpoints(&self) -> anyhow::Result<Vec<(String, String)>> {
        let state = self.state.lock().await;
        match session_tip(&state) {
            Some(tip) => state.repo.log_from(&tip),
            None => Ok(Vec::new()),
        }
    }

    /// The current session tip (falls back to `main` for a fresh session).
    pub async fn current_checkpoint(&self) -> Option<String> {
        let state = self.state.lock().await;
        session_tip(&state)
    }

    /// Materialize the project state recorded in `commit_id`.
    ///
    /// Best effort per file: paths that cannot be deleted or written are
    /// skipped with a log line and reported in the outcome.  The restore is
    /// itself recorded as a new checkpoint so it can be undone.
    ///
    /// Returns the set of paths that changed on disk alongside the outcome,
    /// so the caller can re-index them.
    pub async fn restore_checkpoint(
        &self,
        commit_id: &str,
    ) -> anyhow::Result<(RestoreOutcome, Vec<String>)> {
        let mut state = self.state.lock().await;

        let target = state
            .repo
            .read_commit(commit_id)
            .map_err(|_| CheckpointNotFound(commit_id.to_string()))?;
        let target_map = state.repo.read_tree(&target.tree)?;
        let head_map = current_tree_of(&state)?;

        let mut to_delete: BTreeSet<String> = head_map.keys().cloned().collect();
        to_delete.extend(state.staging.added_paths().cloned());
        to_delete.retain(|p| !target_map.contains_key(p));

        let mut skipped = Vec::new();
        let mut changed: BTreeSet<String> = BTreeSet::new();

        for rel in &to_delete {
            let disk = state.workdir.join(rel);
            match std::fs::remove_file(&disk) {
                Ok(()) => {
                    changed.insert(rel.clone());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %rel, "restore: failed to delete: {e}");
                    skipped.push(rel.clone());
                }
            }
        }

        for (rel, hash) in &target_map {
            let bytes = state.repo.read_blob(hash)?;
            let disk = state.workdir.join(rel);
            if let Ok(existing) = std::fs::read(&disk) {
                if existing == bytes {
                    continue;
                }
            }
            if let Some(parent) = disk.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %rel, "restore: failed to create directory: {e}");
                    skipped.push(rel.clone());
                    continue;
                }
            }
            match std::fs::write(&disk, &bytes) {
                Ok(()) => {
                    changed.insert(rel.clone());
                }
                Err(e) => {
                    warn!(path = %rel, "restore: failed to write: {e}");
                    skipped.push(rel.clone());
                }
            }
        }

        // Per-file failures are reported, not fatal, unless every write
        // the target needed was among them and nothing changed at all.
        let write_failures = skipped.iter().filter(|p| target_map.contains_key(*p)).count();
        if changed.is_empty() && write_failures > 0 {
            anyhow::bail!(
                "restore of {commit_id} wrote nothing; {} paths failed",
                skipped.len()
            );
        }

        state.staging.clear()?;
        prune_empty_dirs(&state.workdir);

        let old_tip = session_tip(&state);
        let new_checkpoint = state.repo.write_commit(
            target.tree.clone(),
            old_tip,
            format!("Restored to {commit_id}"),
        )?;
        let ref_name = state.meta.active().ref_name.clone();
        state.repo.write_ref(&ref_name, &new_checkpoint)?;
        state.meta.active_mut().checkpoints_count += 1;
        state.meta.save()?;

        debug!(restored_to = %commit_id, new_checkpoint = %new_checkpoint, "restore complete");
        Ok((
            RestoreOutcome {
                restored_to: commit_id.to_string(),
                new_checkpoint,
                skipped,
            },
            changed.into_iter().collect(),
        ))
    }

    // ── Pending changes ───────────────────────────────────────────────────────

    /// The difference between the working state and the `main` tip:
    /// committed-but-unapproved changes, staged files, and command-produced
    /// workdir drift, merged into one list.
    pub async fn get_staged_files(&self) -> anyhow::Result<Vec<ChangedFile>> {
        let mut state = self.state.lock().await;
        staged_files_locked(&mut state)
    }

    /// Fast-forward `main` to the session tip and open a fresh session.
    ///
    /// Uncommitted working-state changes are captured into a final
    /// checkpoint first so approval always covers what the user saw.
    pub async fn approve_all(&self, message: Option<String>) -> anyhow::Result<ApproveOutcome> {
        let mut state = self.state.lock().await;

        let msg = message.unwrap_or_else(|| "Approve session changes".to_string());
        let tip = create_checkpoint_locked(&mut state, &msg)?;

        let old_main = state.repo.read_ref("main");
        let commits_approved = state.repo.count_since(&tip, old_main.as_deref())?;
        state.repo.write_ref("main", &tip)?;

        let new_session = state
            .meta
            .rotate(SessionStatus::Merged, Some(tip.clone()))?;
        let new_ref = state.meta.active().ref_name.clone();
        state.repo.write_ref(&new_ref, &tip)?;

        debug!(approved = %tip, commits_approved, "session approved");
        Ok(ApproveOutcome {
            approved_commit: tip,
            new_session,
            commits_approved,
        })
    }

    /// Abandon the current session and materialize the `main` tip.
    /// Returns the outcome plus the set of paths changed on disk.
    pub async fn reset_to_approved(&self) -> anyhow::Result<(ResetOutcome, Vec<String>)> {
        let mut state = self.state.lock().await;

        let main_tip = state
            .repo
            .read_ref("main")
            .context("nothing has been approved in this dialog yet")?;
        let main_commit = state.repo.read_commit(&main_tip)?;
        let main_map = state.repo.read_tree(&main_commit.tree)?;
        let current_map = build_tree_map(&mut state)?;

        let mut changed: BTreeSet<String> = BTreeSet::new();
        for rel in current_map.keys() {
            if !main_map.contains_key(rel) {
                match std::fs::remove_file(state.workdir.join(rel)) {
                    Ok(()) => {
                        changed.insert(rel.clone());
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %rel, "reset: failed to delete: {e}"),
                }
            }
        }
        for (rel, hash) in &main_map {
            if current_map.get(rel) == Some(hash) {
                continue;
            }
            let bytes = state.repo.read_blob(hash)?;
            let disk = state.workdir.join(rel);
            if let Some(parent) = disk.parent() {
                std::fs::create_dir_all(parent)?;
            }
            match std::fs::write(&disk, &bytes) {
                Ok(()) => {
                    changed.insert(rel.clone());
                }
                Err(e) => warn!(path = %rel, "reset: failed to write: {e}"),
            }
        }

        state.staging.clear()?;
        prune_empty_dirs(&state.workdir);

        let new_session = state.meta.rotate(SessionStatus::Abandoned, None)?;
        let new_ref = state.meta.active().ref_name.clone();
        state.repo.write_ref(&new_ref, &main_tip)?;

        debug!(reset_to = %main_tip, "session reset");
        Ok((
            ResetOutcome {
                reset_to: main_tip,
                new_session,
            },
            changed.into_iter().collect(),
        ))
    }

    /// Name of the active session (`session_N`).
    pub async fn active_session(&self) -> String {
        self.state.lock().await.meta.active_session.clone()
    }

    pub async fn session_info(&self) -> anyhow::Result<SessionInfo> {
        let mut state = self.state.lock().await;
        let changed_files = staged_files_locked(&mut state)?;
        let tip = session_tip(&state);
        let main = state.repo.read_ref("main");
        Ok(SessionInfo {
            active_session: state.meta.active_session.clone(),
            session_ref: state.meta.active().ref_name.clone(),
            has_unapproved: !changed_files.is_empty() || tip != main,
            last_approved_at: state.meta.last_approved_at,
            changed_files,
        })
    }

    // ── Edit scopes ───────────────────────────────────────────────────────────

    /// Snapshot the current bytes of `paths` so a failed mutation can be
    /// rolled back.  Independent of checkpoints.
    pub async fn start_edit(&self, paths: &[PathBuf]) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        for path in paths {
            let rel = rel_or_err(&state.workdir, path)?;
            let bytes = std::fs::read(state.workdir.join(&rel)).ok();
            state.edit_cache.insert(rel, bytes);
        }
        Ok(())
    }

    /// Discard edit snapshots after a successful mutation.
    pub async fn finalize_edit(&self) {
        self.state.lock().await.edit_cache.clear();
    }

    /// Restore the snapshotted bytes of every path touched by the current
    /// edit scope.
    pub async fn abort_edit(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let cache = std::mem::take(&mut state.edit_cache);
        for (rel, original) in cache {
            let disk = state.workdir.join(&rel);
            match original {
                Some(bytes) => {
                    if let Some(parent) = disk.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&disk, bytes)
                        .with_context(|| format!("restoring {rel}"))?;
                }
                None => {
                    let _ = std::fs::remove_file(&disk);
                }
            }
        }
        Ok(())
    }
}

// ── Locked helpers ────────────────────────────────────────────────────────────

fn rel_or_err(workdir: &Path, path: &Path) -> anyhow::Result<String> {
    relative_to_workdir(workdir, path)
        .ok_or_else(|| anyhow::anyhow!("path escapes the project root: {}", path.display()))
}

fn session_tip(state: &TrackerState) -> Option<String> {
    state
        .repo
        .read_ref(&state.meta.active().ref_name)
        .or_else(|| state.repo.read_ref("main"))
}

fn current_tree_of(state: &TrackerState) -> anyhow::Result<BTreeMap<String, String>> {
    match session_tip(state) {
        Some(tip) => {
            let commit = state.repo.read_commit(&tip)?;
            state.repo.read_tree(&commit.tree)
        }
        None => Ok(BTreeMap::new()),
    }
}

/// Compute the current-state tree map (path → blob hash), writing blobs.
///
/// Candidates merge three sources: the filtered workdir walk, paths carried
/// by the session tip that still exist on disk (keeps earlier force-adds
/// alive across checkpoints), and the staging area.  Staged removes drop
/// paths; staged adds force ignored paths in.
fn build_tree_map(state: &mut TrackerState) -> anyhow::Result<BTreeMap<String, String>> {
    let mut candidates: BTreeSet<String> =
        walk_project(&state.workdir, &state.extra_ignored).into_iter().collect();

    for rel in current_tree_of(state)?.keys() {
        if state.workdir.join(rel).is_file() {
            candidates.insert(rel.clone());
        }
    }
    for rel in state.staging.added_paths() {
        candidates.insert(rel.clone());
    }
    let removed: Vec<String> = state.staging.removed_paths().cloned().collect();
    for rel in removed {
        candidates.remove(&rel);
    }

    let mut map = BTreeMap::new();
    for rel in candidates {
        let disk = state.workdir.join(&rel);
        match std::fs::read(&disk) {
            Ok(bytes) => {
                map.insert(rel, state.repo.write_blob(&bytes)?);
            }
            Err(_) => {
                // Deleted on disk; keep it only if a staged add carries the
                // content (the file was force-added and then removed by an
                // external actor; the staged snapshot wins).
                if let Some(StagedChange::Add { content_hash }) =
                    state.staging.entries().get(&rel)
                {
                    map.insert(rel, content_hash.clone());
                }
            }
        }
    }
    Ok(map)
}

fn create_checkpoint_locked(state: &mut TrackerState, message: &str) -> anyhow::Result<String> {
    let files = build_tree_map(state)?;
    let tree = state.repo.write_tree(&files)?;
    let tip = session_tip(state);

    if let Some(t) = &tip {
        if state.repo.read_commit(t)?.tree == tree {
            state.staging.clear()?;
            return Ok(t.clone());
        }
    }

    let commit = state.repo.write_commit(tree, tip, message.to_string())?;
    let ref_name = state.meta.active().ref_name.clone();
    state.repo.write_ref(&ref_name, &commit)?;
    // The first checkpoint of a dialog doubles as the initially-approved
    // state so reset and pending-change queries have a base.
    if state.repo.read_ref("main").is_none() {
        state.repo.write_ref("main", &commit)?;
    }
    state.meta.active_mut().checkpoints_count += 1;
    state.meta.save()?;
    state.staging.clear()?;

    debug!(checkpoint = %commit, message, "checkpoint created");
    Ok(commit)
}

fn staged_files_locked(state: &mut TrackerState) -> anyhow::Result<Vec<ChangedFile>> {
    let base_map = match state.repo.read_ref("main") {
        Some(main) => {
            let commit = state.repo.read_commit(&main)?;
            state.repo.read_tree(&commit.tree)?
        }
        None => BTreeMap::new(),
    };
    let current_map = build_tree_map(state)?;

    let mut paths: BTreeSet<&String> = base_map.keys().collect();
    paths.extend(current_map.keys());

    let mut out = Vec::new();
    for path in paths {
        let base_hash = base_map.get(path);
        let cur_hash = current_map.get(path);
        if base_hash == cur_hash {
            continue;
        }
        let base_bytes = match base_hash {
            Some(h) => Some(state.repo.read_blob(h)?),
            None => None,
        };
        let cur_bytes = match cur_hash {
            Some(h) => Some(state.repo.read_blob(h)?),
            None => None,
        };
        if let Some(cf) = changed_file(path, base_bytes.as_deref(), cur_bytes.as_deref()) {
            out.push(cf);
        }
    }
    Ok(out)
}

/// Remove directories left empty by deletions.  The state directory is left
/// alone.
fn prune_empty_dirs(workdir: &Path) {
    fn prune(dir: &Path) -> bool {
        let mut empty = true;
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(_) => return false,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().map(|n| n == ".agentsmithy").unwrap_or(false) {
                    empty = false;
                    continue;
                }
                if prune(&path) {
                    if std::fs::remove_dir(&path).is_err() {
                        empty = false;
                    }
                } else {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }
        empty
    }
    prune(workdir);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
