// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use smithy_config::Config;

use crate::state::AppState;
use crate::ApiError;

/// The effective layered config, with the secret scrubbed.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let config = state.current_config().await;
    let mut value = serde_json::to_value(config.as_ref()).map_err(anyhow::Error::from)?;
    if let Some(model) = value.get_mut("model") {
        model["api_key"] = Value::Null;
    }
    Ok(Json(value))
}

/// Replace the global config layer.  The per-project overlay stays
/// read-only; the merged result is reloaded and applied to the next turn.
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Config>,
) -> Result<Json<Value>, ApiError> {
    smithy_config::save_global(&body)?;
    apply_reloaded(&state).await
}

#[derive(Deserialize)]
pub struct RenameBody {
    pub name: String,
}

/// Point the global model entry at a different model name.
pub async fn rename_model(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RenameBody>,
) -> Result<Json<Value>, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".into()));
    }
    let mut config = (*state.current_config().await).clone();
    config.model.name = body.name;
    smithy_config::save_global(&config)?;
    apply_reloaded(&state).await
}

async fn apply_reloaded(state: &AppState) -> Result<Json<Value>, ApiError> {
    let reloaded = smithy_config::load(&state.workdir)?;
    let errors = reloaded.validate();
    state.status.set_config_state(errors.clone())?;
    state.replace_config(reloaded.clone()).await;
    let mut value = serde_json::to_value(&reloaded).map_err(anyhow::Error::from)?;
    if let Some(model) = value.get_mut("model") {
        model["api_key"] = Value::Null;
    }
    Ok(Json(json!({
        "config": value,
        "config_valid": errors.is_empty(),
        "config_errors": errors,
    })))
}
