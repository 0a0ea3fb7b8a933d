// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use smithy_checkpoints::VersioningTracker;
use smithy_rag::RagIndex;

/// Read access to earlier tool results, implemented by the dialog layer.
pub trait ToolResultLookup: Send + Sync {
    fn load(
        &self,
        dialog_id: &str,
        tool_call_id: &str,
    ) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Events emitted by tools mid-execution, drained by the agent loop and
/// translated into stream events.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    /// A file mutation completed; `file` is the absolute path.
    FileEdit { file: String, diff: String },
    /// `generate_dialog_title` produced a title.
    TitleGenerated { title: String },
}

/// Everything a tool invocation may touch, passed to every `execute`.
#[derive(Clone)]
pub struct ToolContext {
    pub workdir: PathBuf,
    pub dialog_id: String,
    pub versioning: Arc<VersioningTracker>,
    pub rag: Arc<RagIndex>,
    pub results: Arc<dyn ToolResultLookup>,
    /// Tool-call ids belonging to the in-flight turn; `get_tool_result`
    /// refuses these.
    pub current_turn_calls: Arc<Mutex<HashSet<String>>>,
    /// Flips to `true` when the turn is cancelled.
    pub cancel: watch::Receiver<bool>,
    pub events: mpsc::Sender<ToolEvent>,
    pub command_timeout: Duration,
}

impl ToolContext {
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub async fn emit(&self, event: ToolEvent) {
        let _ = self.events.send(event).await;
    }
}
