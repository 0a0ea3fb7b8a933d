// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Scripted provider for tests.
//!
//! Each call to [`MockProvider::complete`] pops the next scripted turn and
//! streams its events.  Agent-loop and chat-service tests drive multi-round
//! conversations (text → tool calls → text) without a network.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{provider::ResponseStream, CompletionRequest, ResponseEvent};

pub struct MockProvider {
    turns: Mutex<Vec<Vec<ResponseEvent>>>,
    /// Messages seen by the last `complete` call, for assertions.
    pub last_request_len: Mutex<usize>,
}

impl MockProvider {
    /// A provider scripted with the given turns, served in order.
    pub fn new(turns: Vec<Vec<ResponseEvent>>) -> Self {
        let mut reversed = turns;
        reversed.reverse();
        Self {
            turns: Mutex::new(reversed),
            last_request_len: Mutex::new(0),
        }
    }

    /// A provider that answers every call with an empty completed stream.
    pub fn empty() -> Self {
        Self::new(vec![])
    }

    /// Convenience: a single text-only turn.
    pub fn text(reply: &str) -> Self {
        Self::new(vec![vec![
            ResponseEvent::TextDelta(reply.to_string()),
            ResponseEvent::Done,
        ]])
    }
}

#[async_trait]
impl crate::ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request_len.lock().unwrap() = req.messages.len();
        let events = self
            .turns
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| vec![ResponseEvent::Done]);
        Ok(Box::pin(futures::stream::iter(
            events.into_iter().map(Ok),
        )))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::ModelProvider;

    #[tokio::test]
    async fn scripted_turns_served_in_order() {
        let p = MockProvider::new(vec![
            vec![ResponseEvent::TextDelta("one".into()), ResponseEvent::Done],
            vec![ResponseEvent::TextDelta("two".into()), ResponseEvent::Done],
        ]);
        for expected in ["one", "two"] {
            let mut stream = p.complete(CompletionRequest::default()).await.unwrap();
            let first = stream.next().await.unwrap().unwrap();
            assert!(matches!(first, ResponseEvent::TextDelta(t) if t == expected));
        }
    }

    #[tokio::test]
    async fn exhausted_script_yields_done_only() {
        let p = MockProvider::empty();
        let mut stream = p.complete(CompletionRequest::default()).await.unwrap();
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            ResponseEvent::Done
        ));
        assert!(stream.next().await.is_none());
    }
}
