// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! History summarization.
//!
//! When the prepared prompt would exceed the configured token budget, older
//! turns are folded into a persisted rolling summary that substitutes for
//! them on this and subsequent turns.  Every invocation is bracketed by
//! `summary_start` / `summary_end`, including the no-op path that merely
//! reuses the stored summary.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use smithy_config::AgentConfig;
use smithy_dialogs::{DialogStore, MessageKind, MessageRecord};
use smithy_model::{CompletionRequest, Message, ModelProvider, ResponseEvent};

use crate::events::StreamEvent;

const SUMMARY_SYSTEM_PROMPT: &str = "You compress coding-assistant conversations. Summarize the \
    transcript below into a dense brief for the assistant's own future \
    reference: the user's goals, decisions taken, files created or changed \
    (with paths), commands run and their outcomes, and anything still \
    unresolved. Plain text, no preamble.";

/// Build the model message history for a turn, summarizing older turns when
/// the estimate exceeds the configured threshold.
pub(crate) async fn prepare_history(
    store: &DialogStore,
    provider: Arc<dyn ModelProvider>,
    config: &AgentConfig,
    dialog_id: &str,
    tx: &mpsc::Sender<StreamEvent>,
) -> anyhow::Result<Vec<Message>> {
    let records = store.messages_from(dialog_id, 0)?;
    let summary = store.get_summary(dialog_id)?;
    let covers = summary.as_ref().map(|(_, idx)| *idx);

    let active: Vec<&MessageRecord> = records
        .iter()
        .filter(|r| covers.map(|c| r.idx > c).unwrap_or(true))
        .collect();

    let summary_tokens = summary.as_ref().map(|(s, _)| s.len() / 4).unwrap_or(0);
    let estimate: usize =
        summary_tokens + active.iter().map(|r| estimate_tokens(r)).sum::<usize>();

    let summary_text = if estimate > config.summarize_threshold_tokens {
        let _ = tx
            .send(StreamEvent::SummaryStart {
                dialog_id: dialog_id.to_string(),
            })
            .await;
        let updated = summarize_older_turns(store, provider, config, dialog_id, &active, summary)
            .await;
        let _ = tx
            .send(StreamEvent::SummaryEnd {
                dialog_id: dialog_id.to_string(),
            })
            .await;
        updated
    } else {
        summary.map(|(s, _)| s)
    };

    // Re-read: a fresh summary moved the coverage boundary.
    let covers = store.get_summary(dialog_id)?.map(|(_, idx)| idx);
    let tail: Vec<&MessageRecord> = records
        .iter()
        .filter(|r| covers.map(|c| r.idx > c).unwrap_or(true))
        .collect();

    let mut messages = Vec::new();
    if let Some(s) = summary_text {
        messages.push(Message::assistant(format!(
            "Summary of the earlier conversation:\n{s}"
        )));
    }
    messages.extend(records_to_messages(&tail));
    Ok(messages)
}

/// Fold everything except the most recent messages into the summary.
/// Failures keep the old summary; the turn proceeds either way.
async fn summarize_older_turns(
    store: &DialogStore,
    provider: Arc<dyn ModelProvider>,
    config: &AgentConfig,
    dialog_id: &str,
    active: &[&MessageRecord],
    previous: Option<(String, i64)>,
) -> Option<String> {
    let mut split = active.len().saturating_sub(config.keep_recent_messages);
    // Keep tool-interaction groups intact: a tool result must never be
    // separated from the assistant message that requested it, or the
    // provider rejects the next request with orphaned references.
    while split > 0 && active[split].kind == MessageKind::Tool {
        split -= 1;
    }
    if split == 0 {
        // Nothing old enough to fold; reuse what we have.
        return previous.map(|(s, _)| s);
    }

    let mut transcript = String::new();
    if let Some((prev, _)) = &previous {
        transcript.push_str(&format!("Earlier summary:\n{prev}\n\n"));
    }
    for record in &active[..split] {
        transcript.push_str(&format!(
            "[{}] {}\n",
            record.kind.as_str(),
            record.content
        ));
    }

    let req = CompletionRequest {
        messages: vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(transcript),
        ],
        tools: vec![],
        stream: true,
    };

    let new_summary = match collect_text(provider, req).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            warn!(dialog_id, "summarization returned empty text; keeping old summary");
            return previous.map(|(s, _)| s);
        }
        Err(e) => {
            warn!(dialog_id, "summarization failed, keeping old summary: {e}");
            return previous.map(|(s, _)| s);
        }
    };

    let covers_through = active[split - 1].idx;
    if let Err(e) = store.save_summary(dialog_id, &new_summary, covers_through) {
        warn!(dialog_id, "failed to persist summary: {e}");
    }
    debug!(dialog_id, covers_through, "history summarized");
    Some(new_summary)
}

async fn collect_text(
    provider: Arc<dyn ModelProvider>,
    req: CompletionRequest,
) -> anyhow::Result<String> {
    let mut stream = provider.complete(req).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(delta) => text.push_str(&delta),
            ResponseEvent::Done => break,
            _ => {}
        }
    }
    Ok(text)
}

fn estimate_tokens(record: &MessageRecord) -> usize {
    let payload_len = record
        .payload
        .as_object()
        .map(|o| o.iter().map(|(k, v)| k.len() + v.to_string().len()).sum())
        .unwrap_or(0);
    ((record.content.len() + payload_len) / 4).max(1)
}

/// Convert stored records into the model message shape.
pub(crate) fn records_to_messages(records: &[&MessageRecord]) -> Vec<Message> {
    let mut out = Vec::new();
    for record in records {
        match record.kind {
            MessageKind::User => out.push(Message::user(record.content.clone())),
            MessageKind::System => out.push(Message::system(record.content.clone())),
            MessageKind::Assistant => {
                if !record.content.is_empty() {
                    out.push(Message::assistant(record.content.clone()));
                }
                if let Some(calls) = record.payload.get("tool_calls").and_then(|v| v.as_array())
                {
                    for call in calls {
                        let id = call.get("id").and_then(|v| v.as_str()).unwrap_or("");
                        let name = call.get("name").and_then(|v| v.as_str()).unwrap_or("");
                        let args = call
                            .get("args")
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "{}".to_string());
                        out.push(Message::tool_call(id, name, args));
                    }
                }
            }
            MessageKind::Tool => {
                let id = record
                    .payload
                    .get("tool_call_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                out.push(Message::tool_result(id, record.content.clone()));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
