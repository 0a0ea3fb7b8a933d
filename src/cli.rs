// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

/// Per-project coding-assistant server.
///
/// Serves one project directory: IDE clients connect over HTTP, chat turns
/// stream back over SSE, and all state lives under `<workdir>/.agentsmithy/`.
#[derive(Parser, Debug)]
#[command(name = "agentsmithy", version, about)]
pub struct Cli {
    /// Project directory to serve.  Must be an absolute path; the
    /// `.agentsmithy/` state directory is created here.
    #[arg(long)]
    pub workdir: PathBuf,

    /// Identifier of the connecting IDE (injected into the system prompt).
    #[arg(long)]
    pub ide: Option<String>,
}

impl Cli {
    /// Argument validation beyond what clap can express.
    pub fn validate(&self) -> Result<(), String> {
        if !self.workdir.is_absolute() {
            return Err(format!(
                "--workdir must be an absolute path, got {}",
                self.workdir.display()
            ));
        }
        if !self.workdir.is_dir() {
            return Err(format!(
                "--workdir does not exist or is not a directory: {}",
                self.workdir.display()
            ));
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
