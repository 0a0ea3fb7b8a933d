// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use smithy_server::{serve, ServeError, ServeOptions};

/// Exit codes: 0 normal shutdown, 2 invalid arguments (clap), 3 another
/// server owns the workdir, 4 initialization failure.
const EXIT_ALREADY_RUNNING: i32 = 3;
const EXIT_INIT_FAILED: i32 = 4;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging();

    if let Err(msg) = cli.validate() {
        eprintln!("error: {msg}");
        std::process::exit(2);
    }

    let options = ServeOptions {
        workdir: cli.workdir,
        ide: cli.ide,
    };

    match serve(options).await {
        Ok(()) => {}
        Err(ServeError::AlreadyRunning(pid)) => {
            eprintln!("error: another server is already running in this workdir (pid {pid})");
            std::process::exit(EXIT_ALREADY_RUNNING);
        }
        Err(ServeError::Init(e)) => {
            eprintln!("error: {e:#}");
            std::process::exit(EXIT_INIT_FAILED);
        }
    }
}

/// `LOG_LEVEL` feeds the env filter; `LOG_FORMAT=json` switches to
/// structured output for log collectors, anything else stays pretty.
fn init_logging() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
