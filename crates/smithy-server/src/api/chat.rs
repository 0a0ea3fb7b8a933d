// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::ACCEPT;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use smithy_core::{ChatRequest, ChatService, StreamEvent};

use crate::sse::{sse_response, EVENT_CHANNEL_CAPACITY};
use crate::state::AppState;
use crate::ApiError;

pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let dialog = state.resolve_dialog(req.dialog_id.as_deref()).await?;

    // One turn per dialog: a held lock fails fast instead of queueing.
    let lock = state.turn_lock(&dialog.id).await;
    let guard = lock
        .try_lock_owned()
        .map_err(|_| ApiError::Conflict("dialog_busy".to_string()))?;

    let deps = state.chat_deps(&dialog.id).await?;
    let service = ChatService::new(deps, state.shutdown.clone());

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    // Cancel the turn when the client goes away or the process shuts down.
    {
        let tx_probe = tx.clone();
        let mut shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx_probe.closed() => {
                    debug!("chat client disconnected; cancelling turn");
                }
                _ = wait_flag(&mut shutdown) => {
                    debug!("shutdown flag set; cancelling turn");
                }
            }
            let _ = cancel_tx.send(true);
        });
    }

    let wants_sse = req.stream
        && headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false);

    let dialog_id = dialog.id.clone();
    let turn = tokio::spawn(async move {
        service.chat(&dialog_id, req, tx, cancel_rx).await;
        drop(guard);
    });

    if wants_sse {
        // The turn task runs detached; the SSE body drains the channel.
        drop(turn);
        Ok(sse_response(rx).into_response())
    } else {
        let events = collect_events(rx).await;
        let _ = turn.await;
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Chat { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        Ok(Json(json!({
            "dialog_id": dialog.id,
            "text": text,
            "events": events,
        }))
        .into_response())
    }
}

async fn collect_events(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        let done = matches!(ev, StreamEvent::Done { .. });
        events.push(ev);
        if done {
            break;
        }
    }
    events
}

async fn wait_flag(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
