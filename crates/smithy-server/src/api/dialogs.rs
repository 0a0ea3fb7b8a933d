// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::AppState;
use crate::ApiError;

fn known_dialog(state: &AppState, id: &str) -> Result<(), ApiError> {
    if state.index.get(id).is_none() {
        return Err(ApiError::NotFound(format!("unknown dialog: {id}")));
    }
    Ok(())
}

// ── CRUD ──────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<Value> {
    let all = state.index.list();
    let total = all.len();
    let limit = params.limit.unwrap_or(50);
    let dialogs: Vec<_> = all.into_iter().skip(params.offset).take(limit).collect();
    Json(json!({ "dialogs": dialogs, "total": total }))
}

pub async fn create(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let dialog = state.create_dialog().await?;
    Ok(Json(serde_json::to_value(dialog).map_err(anyhow::Error::from)?))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let dialog = state
        .index
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown dialog: {id}")))?;
    Ok(Json(serde_json::to_value(dialog).map_err(anyhow::Error::from)?))
}

#[derive(Deserialize)]
pub struct PatchBody {
    pub title: Option<String>,
}

pub async fn patch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PatchBody>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    let dialog = state.index.update(&id, |d| {
        if let Some(title) = body.title.clone() {
            d.title = Some(title);
        }
    })?;
    Ok(Json(serde_json::to_value(dialog).map_err(anyhow::Error::from)?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    state.index.delete(&id)?;
    state.store.delete_dialog(&id)?;
    let dialog_dir = state.state_dir.join("dialogs").join(&id);
    if dialog_dir.is_dir() {
        let _ = std::fs::remove_dir_all(&dialog_dir);
    }
    Ok(Json(json!({ "deleted": id })))
}

// ── Current-dialog pointer ────────────────────────────────────────────────────

pub async fn current(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let dialog = state
        .index
        .current()
        .ok_or_else(|| ApiError::NotFound("no current dialog".to_string()))?;
    Ok(Json(serde_json::to_value(dialog).map_err(anyhow::Error::from)?))
}

#[derive(Deserialize)]
pub struct CurrentParams {
    pub id: String,
}

pub async fn set_current(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CurrentParams>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &params.id)?;
    let dialog = state.index.set_current(&params.id)?;
    Ok(Json(serde_json::to_value(dialog).map_err(anyhow::Error::from)?))
}

// ── History and tool results ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub before: Option<i64>,
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    let page = state
        .store
        .history(&id, params.limit.unwrap_or(50), params.before)?;
    Ok(Json(serde_json::to_value(page).map_err(anyhow::Error::from)?))
}

pub async fn tool_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    let metas = state.store.list_tool_result_meta(&id)?;
    Ok(Json(json!({ "tool_results": metas })))
}

pub async fn tool_result(
    State(state): State<Arc<AppState>>,
    Path((id, tool_call_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    let meta = state
        .store
        .get_tool_result_meta(&tool_call_id)?
        .filter(|m| m.dialog_id == id)
        .ok_or_else(|| {
            ApiError::NotFound(format!("unknown tool result: {tool_call_id}"))
        })?;
    let result = state
        .results
        .load(&id, &tool_call_id)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("result body missing for {tool_call_id}"))
        })?;
    Ok(Json(json!({ "meta": meta, "result": result })))
}

// ── Checkpoints and sessions ──────────────────────────────────────────────────

pub async fn checkpoints(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let dialog = state
        .index
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown dialog: {id}")))?;
    let tracker = state.tracker_for(&id).await?;
    let checkpoints: Vec<Value> = tracker
        .list_checkpoints()
        .await?
        .into_iter()
        .map(|(commit_id, message)| json!({ "commit_id": commit_id, "message": message }))
        .collect();
    Ok(Json(json!({
        "checkpoints": checkpoints,
        "initial_checkpoint": dialog.initial_checkpoint,
    })))
}

#[derive(Deserialize)]
pub struct RestoreBody {
    pub checkpoint_id: String,
}

pub async fn restore(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RestoreBody>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    if body.checkpoint_id.trim().is_empty() {
        return Err(ApiError::Validation("checkpoint_id must not be empty".into()));
    }
    let tracker = state.tracker_for(&id).await?;
    let (outcome, changed) = tracker.restore_checkpoint(&body.checkpoint_id).await?;
    if let Err(e) = state.rag.reindex_paths(&changed).await {
        tracing::warn!(dialog_id = %id, "post-restore reindex failed: {e}");
    }
    Ok(Json(json!({
        "restored_to": outcome.restored_to,
        "new_checkpoint": outcome.new_checkpoint,
        "skipped": outcome.skipped,
    })))
}

#[derive(Deserialize, Default)]
pub struct ApproveBody {
    pub message: Option<String>,
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<ApproveBody>>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    let tracker = state.tracker_for(&id).await?;
    let message = body.and_then(|Json(b)| b.message);
    let outcome = tracker.approve_all(message).await?;
    state.sync_dialog_session(&id).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(anyhow::Error::from)?))
}

pub async fn reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    let tracker = state.tracker_for(&id).await?;
    let (outcome, changed) = tracker.reset_to_approved().await?;
    if let Err(e) = state.rag.reindex_paths(&changed).await {
        tracing::warn!(dialog_id = %id, "post-reset reindex failed: {e}");
    }
    state.sync_dialog_session(&id).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(anyhow::Error::from)?))
}

pub async fn session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    known_dialog(&state, &id)?;
    let tracker = state.tracker_for(&id).await?;
    let info = tracker.session_info().await?;
    Ok(Json(serde_json::to_value(info).map_err(anyhow::Error::from)?))
}
