// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tracing::info;

use smithy_checkpoints::VersioningTracker;
use smithy_config::Config;
use smithy_core::{ChatDeps, GenerateDialogTitleTool};
use smithy_dialogs::{DialogIndex, DialogMeta, DialogStore, ToolResultStore};
use smithy_model::{providers_from_config, EmbeddingsClient, Workload};
use smithy_rag::RagIndex;
use smithy_tools::{builtin::register_builtin, PathLocks, ToolRegistry};

use crate::status::StatusFile;
use crate::ApiError;

/// Project-wide shared state behind every HTTP handler.
pub struct AppState {
    pub workdir: PathBuf,
    pub state_dir: PathBuf,
    /// Reloaded on config writes; picked up at the provider construction
    /// boundary of the next turn.
    pub config: RwLock<Arc<Config>>,
    pub index: Arc<DialogIndex>,
    pub store: DialogStore,
    pub results: ToolResultStore,
    pub rag: Arc<RagIndex>,
    pub locks: Arc<PathLocks>,
    pub status: Arc<StatusFile>,
    pub shutdown: watch::Receiver<bool>,
    pub ide: Option<String>,
    /// One versioning tracker per dialog, created on first touch.
    trackers: Mutex<HashMap<String, Arc<VersioningTracker>>>,
    /// Per-dialog turn locks: one turn per dialog at a time.
    turn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppState {
    pub fn new(
        workdir: PathBuf,
        config: Config,
        status: Arc<StatusFile>,
        shutdown: watch::Receiver<bool>,
        ide: Option<String>,
    ) -> anyhow::Result<Self> {
        let state_dir = workdir.join(".agentsmithy");
        let dialogs_dir = state_dir.join("dialogs");
        let index = Arc::new(DialogIndex::open(&dialogs_dir)?);
        let store = DialogStore::open(dialogs_dir.join("messages.sqlite"))?;
        let results = ToolResultStore::new(&dialogs_dir);

        let embedder = config.model.resolve_api_key().map(|key| {
            let base = config
                .embedding
                .base_url
                .clone()
                .or_else(|| config.model.base_url.clone())
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
            EmbeddingsClient::new(config.embedding.model.clone(), key, &base)
        });
        let rag = Arc::new(RagIndex::open(&workdir, &state_dir.join("rag"), embedder)?);

        Ok(Self {
            workdir,
            state_dir,
            config: RwLock::new(Arc::new(config)),
            index,
            store,
            results,
            rag,
            locks: Arc::new(PathLocks::new()),
            status,
            shutdown,
            ide,
            trackers: Mutex::new(HashMap::new()),
            turn_locks: Mutex::new(HashMap::new()),
        })
    }

    pub async fn current_config(&self) -> Arc<Config> {
        self.config.read().await.clone()
    }

    pub async fn replace_config(&self, config: Config) {
        *self.config.write().await = Arc::new(config);
    }

    /// The dialog's tracker, opened on first use.
    pub async fn tracker_for(&self, dialog_id: &str) -> anyhow::Result<Arc<VersioningTracker>> {
        let mut trackers = self.trackers.lock().await;
        if let Some(t) = trackers.get(dialog_id) {
            return Ok(t.clone());
        }
        let config = self.current_config().await;
        let tracker = Arc::new(VersioningTracker::open(
            &self.workdir,
            &self
                .state_dir
                .join("dialogs")
                .join(dialog_id)
                .join("checkpoints"),
            config.tools.ignored_dirs.clone(),
        )?);
        trackers.insert(dialog_id.to_string(), tracker.clone());
        Ok(tracker)
    }

    /// The per-dialog turn lock object.
    pub async fn turn_lock(&self, dialog_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().await;
        locks
            .entry(dialog_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve the dialog a chat request addresses: explicit id, then the
    /// current dialog, then a freshly created default.
    pub async fn resolve_dialog(&self, id: Option<&str>) -> Result<DialogMeta, ApiError> {
        match id {
            Some(id) => self
                .index
                .get(id)
                .ok_or_else(|| ApiError::NotFound(format!("unknown dialog: {id}"))),
            None => match self.index.current() {
                Some(d) => Ok(d),
                None => self.create_dialog().await.map_err(ApiError::from),
            },
        }
    }

    /// Create a dialog and take its initial checkpoint.
    pub async fn create_dialog(&self) -> anyhow::Result<DialogMeta> {
        let dialog = self.index.create_dialog()?;
        let tracker = self.tracker_for(&dialog.id).await?;
        let initial = tracker.create_checkpoint("Initial checkpoint").await?;
        let dialog = self
            .index
            .update(&dialog.id, |d| d.initial_checkpoint = Some(initial.clone()))?;
        info!(dialog_id = %dialog.id, "dialog created");
        Ok(dialog)
    }

    /// Assemble the per-turn dependency bundle for one dialog.
    pub async fn chat_deps(&self, dialog_id: &str) -> anyhow::Result<ChatDeps> {
        let config = self.current_config().await;
        let providers = providers_from_config(&config);

        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry);
        registry.register(GenerateDialogTitleTool::new(
            providers.provider_for(Workload::Summarize),
            self.index.clone(),
            self.store.clone(),
        ));

        Ok(ChatDeps {
            workdir: self.workdir.clone(),
            config,
            providers,
            registry: Arc::new(registry),
            store: self.store.clone(),
            results: self.results.clone(),
            index: self.index.clone(),
            tracker: self.tracker_for(dialog_id).await?,
            rag: self.rag.clone(),
            locks: self.locks.clone(),
            ide: self.ide.clone(),
        })
    }

    /// Reflect session changes into the dialog index after approve/reset.
    pub async fn sync_dialog_session(&self, dialog_id: &str) -> anyhow::Result<DialogMeta> {
        let tracker = self.tracker_for(dialog_id).await?;
        let session = tracker.active_session().await;
        let info = tracker.session_info().await?;
        self.index.update(dialog_id, |d| {
            d.active_session = session.clone();
            d.last_approved_at = info.last_approved_at;
        })
    }
}

/// Probe for a free port starting at `base`, walking upward.
pub fn probe_port(host: &str, base: u16) -> anyhow::Result<(std::net::TcpListener, u16)> {
    for port in base..base.saturating_add(64) {
        match std::net::TcpListener::bind((host, port)) {
            Ok(listener) => {
                listener.set_nonblocking(true)?;
                return Ok((listener, port));
            }
            Err(_) => continue,
        }
    }
    anyhow::bail!("no free port in {base}..{}", base.saturating_add(64))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
