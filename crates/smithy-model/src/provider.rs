// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use smithy_config::Config;

use crate::{CompletionRequest, OpenAICompatProvider, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;
}

/// Which model a piece of work should run on.
///
/// Chat turns use the configured primary model; summarization and title
/// generation use the (usually cheaper) summary model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Chat,
    Summarize,
}

/// The providers one project runs with, keyed by workload.
#[derive(Clone)]
pub struct ProviderSet {
    chat: Arc<dyn ModelProvider>,
    summarize: Arc<dyn ModelProvider>,
}

impl ProviderSet {
    pub fn new(chat: Arc<dyn ModelProvider>, summarize: Arc<dyn ModelProvider>) -> Self {
        Self { chat, summarize }
    }

    /// A set where every workload runs on the same provider.
    pub fn uniform(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            chat: provider.clone(),
            summarize: provider,
        }
    }

    pub fn provider_for(&self, workload: Workload) -> Arc<dyn ModelProvider> {
        match workload {
            Workload::Chat => self.chat.clone(),
            Workload::Summarize => self.summarize.clone(),
        }
    }
}

/// Build the provider set from config.  The summary workload reuses the chat
/// endpoint and key with `model.summary_model` when configured.
pub fn providers_from_config(config: &Config) -> ProviderSet {
    let api_key = config.model.resolve_api_key();
    let base_url = config
        .model
        .base_url
        .clone()
        .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

    let chat: Arc<dyn ModelProvider> = Arc::new(OpenAICompatProvider::new(
        config.model.name.clone(),
        api_key.clone(),
        &base_url,
        config.model.max_tokens,
        config.model.temperature,
        config.model.read_timeout_secs,
    ));

    let summarize: Arc<dyn ModelProvider> = match &config.model.summary_model {
        Some(name) if name != &config.model.name => Arc::new(OpenAICompatProvider::new(
            name.clone(),
            api_key,
            &base_url,
            config.model.max_tokens,
            config.model.temperature,
            config.model.read_timeout_secs,
        )),
        _ => chat.clone(),
    };

    ProviderSet::new(chat, summarize)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
