// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod loader;
mod schema;

pub use loader::{global_config_path, load, save_global, ConfigPaths};
pub use schema::{AgentConfig, Config, EmbeddingConfig, ModelConfig, ServerConfig, ToolsConfig};
