// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let doc = state.status.read();
    Json(json!({
        "status": "ok",
        "pid": std::process::id(),
        "port": doc.as_ref().and_then(|d| d.port),
        "server_status": doc.as_ref().map(|d| d.server_status),
        "scan_status": doc.as_ref().and_then(|d| d.scan_status.clone()),
        "config_valid": doc.as_ref().map(|d| d.config_valid).unwrap_or(true),
        "config_errors": doc.as_ref().map(|d| d.config_errors.clone()).unwrap_or_default(),
    }))
}
