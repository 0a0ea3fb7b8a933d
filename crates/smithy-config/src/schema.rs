// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name forwarded to the provider API.
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Cheaper model used for summarization and title generation.
    /// Falls back to `name` when unset.
    pub summary_model: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies, LiteLLM, or vLLM.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
    /// Per-chunk read deadline on the streaming response, in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            summary_model: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl ModelConfig {
    /// Resolve the API key: explicit value wins, then the configured env var,
    /// then the conventional OPENAI_API_KEY fallback.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.clone());
        }
        if let Some(var) = &self.api_key_env {
            if let Ok(k) = std::env::var(var) {
                if !k.is_empty() {
                    return Some(k);
                }
            }
        }
        std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model for the RAG index.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL override; defaults to the chat model's endpoint.
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// First port to probe; the server walks upward until a free one is found.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model ↔ tool rounds in a single user turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Approximate prompt token count that triggers history summarization.
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold_tokens: usize,
    /// Number of recent messages kept verbatim when summarizing.
    #[serde(default = "default_keep_recent")]
    pub keep_recent_messages: usize,
    /// Wall-clock timeout for `run_command`, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            summarize_threshold_tokens: default_summarize_threshold(),
            keep_recent_messages: default_keep_recent(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Directories excluded from checkpoint trees and file search in addition
    /// to `.gitignore` rules.  The state directory and VCS metadata are always
    /// excluded regardless of this list.
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ignored_dirs: default_ignored_dirs(),
        }
    }
}

fn default_model_name() -> String {
    "gpt-4o".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8477
}

fn default_max_tool_rounds() -> u32 {
    25
}

fn default_summarize_threshold() -> usize {
    60_000
}

fn default_keep_recent() -> usize {
    8
}

fn default_command_timeout() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    120
}

fn default_ignored_dirs() -> Vec<String> {
    [
        "node_modules",
        "target",
        "__pycache__",
        ".venv",
        "venv",
        "dist",
        "build",
        ".idea",
        ".vscode",
        ".DS_Store",
        "*.pyc",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// Apply environment variable overrides on top of the file layers.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MODEL") {
            if !v.is_empty() {
                self.model.name = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
            if !v.is_empty() {
                self.model.base_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL") {
            if !v.is_empty() {
                self.embedding.model = v;
            }
        }
        if let Ok(v) = std::env::var("SERVER_HOST") {
            if !v.is_empty() {
                self.server.host = v;
            }
        }
        if let Ok(v) = std::env::var("SERVER_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
    }

    /// Human-readable configuration problems.  A missing API key is reported
    /// but never blocks startup; the server comes up degraded and the
    /// problem surfaces in `config_errors`.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.model.name.trim().is_empty() {
            problems.push("model.name is empty".to_string());
        }
        if self.model.resolve_api_key().is_none() {
            problems.push(format!(
                "no API key: set {} or model.api_key",
                self.model
                    .api_key_env
                    .as_deref()
                    .unwrap_or("OPENAI_API_KEY")
            ));
        }
        if let Some(t) = self.model.temperature {
            if !(0.0..=2.0).contains(&t) {
                problems.push(format!("model.temperature {t} outside 0.0–2.0"));
            }
        }
        if self.agent.max_tool_rounds == 0 {
            problems.push("agent.max_tool_rounds must be at least 1".to_string());
        }
        problems
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
