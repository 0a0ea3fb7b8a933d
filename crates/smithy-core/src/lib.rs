// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod chat;
mod events;
mod executor;
mod prompts;
mod summarize;
mod title;

#[cfg(test)]
mod tests;

pub use chat::{ChatDeps, ChatRequest, ChatService, CodeContext, FileContext, IncomingMessage, TurnError};
pub use events::StreamEvent;
pub use prompts::system_prompt;
pub use title::GenerateDialogTitleTool;
