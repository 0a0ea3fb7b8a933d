// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod embeddings;
mod mock;
mod openai_compat;
mod provider;
mod types;

pub use embeddings::EmbeddingsClient;
pub use mock::MockProvider;
pub use openai_compat::OpenAICompatProvider;
pub use provider::{providers_from_config, ModelProvider, ProviderSet, ResponseStream, Workload};
pub use types::{
    CompletionRequest, FunctionCall, Message, MessageContent, ResponseEvent, Role, ToolSchema,
    Usage,
};
