// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Chat ingress: one call drives one user turn end to end.
//!
//! The HTTP layer resolves the dialog, enforces the per-dialog turn lock,
//! and hands the request here.  This module makes the pre-message
//! checkpoint, emits the `user` event, reconciles the RAG index, builds
//! the prompt, runs the agent loop, and closes the stream with
//! `error`-then-`done` semantics.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use smithy_config::Config;
use smithy_dialogs::{DialogIndex, DialogStore, MessageKind, ToolResultStore};
use smithy_checkpoints::VersioningTracker;
use smithy_model::{ProviderSet, Workload};
use smithy_rag::RagIndex;
use smithy_tools::{PathLocks, ToolContext, ToolRegistry, ToolResultLookup};

use crate::agent::run_agent_loop;
use crate::events::StreamEvent;
use crate::prompts::{format_code_context, system_prompt, truncate_query};
use crate::summarize::prepare_history;
use crate::title::GenerateDialogTitleTool;

// ── Request shape ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileContext {
    pub path: String,
    pub language: Option<String>,
    pub content: Option<String>,
    pub selection: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeContext {
    pub current_file: Option<FileContext>,
    #[serde(default)]
    pub open_files: Vec<FileContext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub context: Option<CodeContext>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub dialog_id: Option<String>,
}

// ── Turn failure classification ───────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("turn cancelled")]
    Cancelled,
    #[error("tool loop exceeded the configured round budget")]
    ToolLoopExceeded,
    #[error("malformed request: {0}")]
    Validation(String),
    #[error("model provider error: {0}")]
    Provider(#[source] anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

// ── Dependencies ──────────────────────────────────────────────────────────────

/// Everything one turn needs.  Cheap to clone; the HTTP layer builds one per
/// turn with the dialog's own tracker.
#[derive(Clone)]
pub struct ChatDeps {
    pub workdir: PathBuf,
    pub config: Arc<Config>,
    pub providers: ProviderSet,
    pub registry: Arc<ToolRegistry>,
    pub store: DialogStore,
    pub results: ToolResultStore,
    pub index: Arc<DialogIndex>,
    pub tracker: Arc<VersioningTracker>,
    pub rag: Arc<RagIndex>,
    pub locks: Arc<PathLocks>,
    pub ide: Option<String>,
}

struct ResultLookup(ToolResultStore);

impl ToolResultLookup for ResultLookup {
    fn load(
        &self,
        dialog_id: &str,
        tool_call_id: &str,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        self.0.load(dialog_id, tool_call_id)
    }
}

pub struct ChatService {
    deps: ChatDeps,
    shutdown: watch::Receiver<bool>,
}

impl ChatService {
    pub fn new(deps: ChatDeps, shutdown: watch::Receiver<bool>) -> Self {
        Self { deps, shutdown }
    }

    /// Run one turn.  Always terminates the stream with `done`; failures
    /// emit `error` immediately before it.
    pub async fn chat(
        &self,
        dialog_id: &str,
        req: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: watch::Receiver<bool>,
    ) {
        let result = self.run_turn(dialog_id, req, &tx, cancel).await;
        match result {
            Ok(()) => {
                let _ = tx
                    .send(StreamEvent::Done {
                        dialog_id: dialog_id.to_string(),
                    })
                    .await;
            }
            Err(err) => {
                let code = match &err {
                    TurnError::Cancelled => {
                        if *self.shutdown.borrow() {
                            "shutdown"
                        } else {
                            "cancelled"
                        }
                    }
                    TurnError::ToolLoopExceeded => "tool_loop_exceeded",
                    TurnError::Validation(_) => "validation",
                    TurnError::Provider(_) => "provider_error",
                    TurnError::Internal(_) => "internal",
                };
                warn!(dialog_id, code, "turn failed: {err}");
                let _ = tx
                    .send(StreamEvent::Error {
                        dialog_id: dialog_id.to_string(),
                        code: code.to_string(),
                        message: err.to_string(),
                    })
                    .await;
                let _ = tx
                    .send(StreamEvent::Done {
                        dialog_id: dialog_id.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn run_turn(
        &self,
        dialog_id: &str,
        req: ChatRequest,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), TurnError> {
        let deps = &self.deps;
        let query = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .ok_or_else(|| TurnError::Validation("request carries no user message".into()))?;

        // Snapshot the project before touching anything: restoring this
        // checkpoint undoes the entire turn.
        let checkpoint = deps
            .tracker
            .create_checkpoint(&format!(
                "Before user message: {}",
                truncate_query(&query, 50)
            ))
            .await?;
        let session = deps.tracker.active_session().await;

        tx.send(StreamEvent::User {
            dialog_id: dialog_id.to_string(),
            content: query.clone(),
            checkpoint: checkpoint.clone(),
            session: session.clone(),
        })
        .await
        .map_err(|_| TurnError::Cancelled)?;

        deps.store.append_message(
            dialog_id,
            MessageKind::User,
            &query,
            &json!({"checkpoint_id": checkpoint, "session_name": session}),
        )?;

        // Catch command-made and external edits before the model reasons
        // over stale context.
        if let Err(e) = deps.rag.full_sync().await {
            warn!(dialog_id, "rag sync failed: {e}");
        }

        let mut messages = vec![smithy_model::Message::system(self.build_system_prompt(
            req.context.as_ref(),
            &query,
        ).await)];
        messages.extend(
            prepare_history(
                &deps.store,
                deps.providers.provider_for(Workload::Summarize),
                &deps.config.agent,
                dialog_id,
                tx,
            )
            .await?,
        );

        let (events_tx, mut events_rx) = mpsc::channel(256);
        let ctx = ToolContext {
            workdir: deps.workdir.clone(),
            dialog_id: dialog_id.to_string(),
            versioning: deps.tracker.clone(),
            rag: deps.rag.clone(),
            results: Arc::new(ResultLookup(deps.results.clone())),
            current_turn_calls: Arc::new(std::sync::Mutex::new(HashSet::new())),
            cancel: cancel.clone(),
            events: events_tx,
            command_timeout: std::time::Duration::from_secs(
                deps.config.agent.command_timeout_secs,
            ),
        };

        run_agent_loop(
            deps,
            dialog_id,
            &checkpoint,
            &ctx,
            &mut events_rx,
            tx,
            cancel,
            messages,
        )
        .await?;

        // First completed assistant turn names the dialog.
        let untitled = deps
            .index
            .get(dialog_id)
            .map(|d| d.title.is_none())
            .unwrap_or(false);
        if untitled {
            let titler = GenerateDialogTitleTool::new(
                deps.providers.provider_for(Workload::Summarize),
                deps.index.clone(),
                deps.store.clone(),
            );
            if let Err(e) = titler.generate(dialog_id).await {
                debug!(dialog_id, "title generation skipped: {e}");
            }
        }

        Ok(())
    }

    async fn build_system_prompt(&self, context: Option<&CodeContext>, query: &str) -> String {
        let mut prompt = system_prompt(&self.deps.workdir, self.deps.ide.as_deref());
        if let Some(block) = context.and_then(format_code_context) {
            prompt.push_str("\n\n# Editor context\n");
            prompt.push_str(&block);
        }
        match self.deps.rag.query(query, 3).await {
            Ok(chunks) if !chunks.is_empty() => {
                prompt.push_str("\n\n# Possibly relevant project code\n");
                for chunk in chunks {
                    prompt.push_str(&format!("## {}\n```\n{}\n```\n", chunk.path, chunk.content));
                }
            }
            Ok(_) => {}
            Err(e) => debug!("rag retrieval failed: {e}"),
        }
        prompt
    }
}
