// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod chat;
mod config;
mod dialogs;
mod health;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/chat", post(chat::chat))
        .route("/api/dialogs", get(dialogs::list).post(dialogs::create))
        .route(
            "/api/dialogs/current",
            get(dialogs::current).patch(dialogs::set_current),
        )
        .route(
            "/api/dialogs/:id",
            get(dialogs::get_one)
                .patch(dialogs::patch)
                .delete(dialogs::delete),
        )
        .route("/api/dialogs/:id/history", get(dialogs::history))
        .route("/api/dialogs/:id/tool-results", get(dialogs::tool_results))
        .route(
            "/api/dialogs/:id/tool-results/:tool_call_id",
            get(dialogs::tool_result),
        )
        .route("/api/dialogs/:id/checkpoints", get(dialogs::checkpoints))
        .route("/api/dialogs/:id/restore", post(dialogs::restore))
        .route("/api/dialogs/:id/approve", post(dialogs::approve))
        .route("/api/dialogs/:id/reset", post(dialogs::reset))
        .route("/api/dialogs/:id/session", get(dialogs::session))
        .route("/api/config", get(config::get_config).put(config::put_config))
        .route("/api/config/rename", post(config::rename_model))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
