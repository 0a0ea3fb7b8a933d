// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The SSE leg of the event pipeline.
//!
//! The agent loop produces [`StreamEvent`]s into a bounded channel; this
//! module turns the receiving end into an `Sse` response.  Back-pressure is
//! the channel capacity: a slow client blocks the agent loop instead of
//! buffering unboundedly.  When the client disconnects the receiver drops,
//! the producer's sends fail, and the turn observes cancellation.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use smithy_core::StreamEvent;

/// Channel capacity between the agent loop and the HTTP responder.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

pub fn sse_response(
    rx: tokio::sync::mpsc::Receiver<StreamEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|_| "{\"type\":\"error\",\"code\":\"internal\"}".to_string());
        Ok(Event::default().data(data))
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
