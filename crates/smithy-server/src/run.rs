// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Process startup and the status lifecycle.
//!
//! Order matters and is part of the contract: singleton check, port probe,
//! `starting` written with pid+port, config validated (a missing API key is
//! reported but does not block), `ready` after the listener is live,
//! `stopping` on signal, `stopped` after cleanup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use crate::api::router;
use crate::state::{probe_port, AppState};
use crate::status::StatusFile;

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("another server is already running in this workdir (pid {0})")]
    AlreadyRunning(u32),
    #[error(transparent)]
    Init(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub workdir: PathBuf,
    pub ide: Option<String>,
}

/// Run the server for one project until shutdown.
pub async fn serve(options: ServeOptions) -> Result<(), ServeError> {
    let state_dir = options.workdir.join(".agentsmithy");
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating {}", state_dir.display()))
        .map_err(ServeError::Init)?;

    let status = Arc::new(StatusFile::new(&state_dir));
    // A second startup must exit without touching status.json.
    if let Err(pid) = status.check_singleton() {
        return Err(ServeError::AlreadyRunning(pid));
    }

    let result = serve_inner(&options, &status).await;
    if let Err(ServeError::Init(e)) = &result {
        // Leave the failure reason where clients look for it; approved
        // project state is untouched.
        let _ = status.mark_error(&format!("{e:#}"));
    }
    result
}

async fn serve_inner(options: &ServeOptions, status: &Arc<StatusFile>) -> Result<(), ServeError> {
    let config = smithy_config::load(&options.workdir).map_err(ServeError::Init)?;

    let (listener, port) = probe_port(&config.server.host, config.server.port)
        .context("probing for a free port")
        .map_err(ServeError::Init)?;
    status.mark_starting(port).map_err(ServeError::Init)?;

    // Config problems surface through status.json and /health; a missing
    // API key degrades the server instead of blocking startup.
    let config_errors = config.validate();
    status
        .set_config_state(config_errors.clone())
        .map_err(ServeError::Init)?;
    if !config_errors.is_empty() {
        for problem in &config_errors {
            tracing::warn!("config: {problem}");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(
        AppState::new(
            options.workdir.clone(),
            config,
            status.clone(),
            shutdown_rx.clone(),
            options.ide.clone(),
        )
        .map_err(ServeError::Init)?,
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::from_std(listener)
        .context("registering listener with the runtime")
        .map_err(ServeError::Init)?;

    status.mark_ready().map_err(ServeError::Init)?;
    info!(port, workdir = %options.workdir.display(), "server ready");

    let status_for_signal = status.clone();
    let shutdown_future = async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = status_for_signal.mark_stopping();
        let _ = shutdown_tx.send(true);
        // Give in-flight streams a moment to emit their error/done pair.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_future)
        .await
        .context("server error")
        .map_err(ServeError::Init)?;

    status.mark_stopped().map_err(ServeError::Init)?;
    info!("server stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
