// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Contention control for a batch of parallel tool calls.
///
/// File-mutating tools take an exclusive per-path lock; `run_command` takes
/// the whole-workdir lock because its side effects cannot be scoped.  Paths
/// are locked in sorted order so two batches touching overlapping sets
/// cannot deadlock.
#[derive(Default)]
pub struct PathLocks {
    paths: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    workdir: Arc<Mutex<()>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive locks for `paths` (deduplicated, sorted).  The
    /// returned guards release on drop.
    pub async fn acquire_paths(&self, paths: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<String> = paths.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for path in sorted {
            let lock = {
                let mut map = self.paths.lock().await;
                map.entry(path).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
            };
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    pub async fn acquire_workdir(&self) -> OwnedMutexGuard<()> {
        self.workdir.clone().lock_owned().await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let guards = locks.acquire_paths(&["a.txt".into()]).await;

        let locks2 = locks.clone();
        let contender = tokio::spawn(async move {
            let _g = locks2.acquire_paths(&["a.txt".into()]).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished(), "second acquire must block");

        drop(guards);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("released lock must unblock the contender")
            .unwrap();
    }

    #[tokio::test]
    async fn distinct_paths_do_not_contend() {
        let locks = Arc::new(PathLocks::new());
        let _a = locks.acquire_paths(&["a.txt".into()]).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire_paths(&["b.txt".into()]),
        )
        .await;
        assert!(b.is_ok(), "unrelated path must not block");
    }

    #[tokio::test]
    async fn duplicate_paths_are_deduplicated() {
        let locks = PathLocks::new();
        let guards = locks
            .acquire_paths(&["x".into(), "x".into(), "x".into()])
            .await;
        assert_eq!(guards.len(), 1);
    }

    #[tokio::test]
    async fn workdir_lock_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let guard = locks.acquire_workdir().await;
        let locks2 = locks.clone();
        let contender = tokio::spawn(async move {
            let _g = locks2.acquire_workdir().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }
}
