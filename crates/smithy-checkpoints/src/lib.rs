// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod diff;
mod filter;
mod objects;
mod sessions;
mod staging;
mod store;
mod tracker;

pub use diff::{changed_file, is_binary, unified_diff, ChangeStatus, ChangedFile};
pub use filter::{relative_to_workdir, walk_project};
pub use objects::{hash_object, Commit, EntryKind, TreeEntry};
pub use sessions::{SessionRecord, SessionStatus};
pub use store::CheckpointRepo;
pub use tracker::{
    ApproveOutcome, CheckpointNotFound, ResetOutcome, RestoreOutcome, SessionInfo,
    VersioningTracker,
};
