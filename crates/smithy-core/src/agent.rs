// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The model ↔ tool iteration driving a single user turn.
//!
//! Streaming segmentation: reasoning and chat text are bookended by
//! `reasoning_start`/`reasoning_end` and `chat_start`/`chat_end` brackets
//! that never interleave; `tool_call` events fire after the closing
//! `chat_end`, at the start of execution.  Tool-call fragments are
//! reassembled per stream index; malformed argument JSON becomes a
//! synthesized validation error result without invoking the tool.

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use smithy_dialogs::MessageKind;
use smithy_model::{CompletionRequest, Message, ResponseEvent, Workload};
use smithy_tools::{ToolCall, ToolContext, ToolEvent};

use crate::chat::{ChatDeps, TurnError};
use crate::events::StreamEvent;
use crate::executor::{execute_batch, ReconstructedCall};

pub(crate) async fn run_agent_loop(
    deps: &ChatDeps,
    dialog_id: &str,
    checkpoint_id: &str,
    ctx: &ToolContext,
    events_rx: &mut mpsc::Receiver<ToolEvent>,
    tx: &mpsc::Sender<StreamEvent>,
    mut cancel: watch::Receiver<bool>,
    mut messages: Vec<Message>,
) -> Result<(), TurnError> {
    let tool_schemas: Vec<smithy_model::ToolSchema> = deps
        .registry
        .schemas()
        .into_iter()
        .map(|s| smithy_model::ToolSchema {
            name: s.name,
            description: s.description,
            parameters: s.parameters,
        })
        .collect();

    const MAX_EMPTY_TURN_RETRIES: u32 = 2;
    let mut rounds = 0u32;
    let mut empty_turn_retries = 0u32;
    loop {
        rounds += 1;
        if rounds > deps.config.agent.max_tool_rounds {
            return Err(TurnError::ToolLoopExceeded);
        }

        let provider = deps.providers.provider_for(Workload::Chat);
        let req = CompletionRequest {
            messages: messages.clone(),
            tools: tool_schemas.clone(),
            stream: true,
        };
        let mut stream = provider
            .complete(req)
            .await
            .map_err(TurnError::Provider)?;

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut chat_open = false;
        let mut reasoning_open = false;
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
        let mut stream_error: Option<anyhow::Error> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel) => {
                    close_brackets(tx, dialog_id, &mut chat_open, &mut reasoning_open).await;
                    persist_partial(deps, dialog_id, &text, &reasoning);
                    return Err(TurnError::Cancelled);
                }
                ev = stream.next() => ev,
            };

            match event {
                None => break,
                Some(Err(e)) => {
                    stream_error = Some(e);
                    break;
                }
                Some(Ok(ResponseEvent::TextDelta(delta))) if !delta.is_empty() => {
                    if reasoning_open {
                        send(tx, StreamEvent::ReasoningEnd { dialog_id: dialog_id.into() })
                            .await?;
                        reasoning_open = false;
                    }
                    if !chat_open {
                        send(tx, StreamEvent::ChatStart { dialog_id: dialog_id.into() }).await?;
                        chat_open = true;
                    }
                    text.push_str(&delta);
                    send(
                        tx,
                        StreamEvent::Chat {
                            dialog_id: dialog_id.into(),
                            content: delta,
                        },
                    )
                    .await?;
                }
                Some(Ok(ResponseEvent::TextDelta(_))) => {}
                Some(Ok(ResponseEvent::ReasoningDelta(delta))) => {
                    if chat_open {
                        send(tx, StreamEvent::ChatEnd { dialog_id: dialog_id.into() }).await?;
                        chat_open = false;
                    }
                    if !reasoning_open {
                        send(
                            tx,
                            StreamEvent::ReasoningStart { dialog_id: dialog_id.into() },
                        )
                        .await?;
                        reasoning_open = true;
                    }
                    reasoning.push_str(&delta);
                    send(
                        tx,
                        StreamEvent::Reasoning {
                            dialog_id: dialog_id.into(),
                            content: delta,
                        },
                    )
                    .await?;
                }
                Some(Ok(ResponseEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                })) => {
                    let ptc = pending.entry(index).or_default();
                    if !id.is_empty() {
                        ptc.id = id;
                    }
                    if !name.is_empty() {
                        // Name fragments are monotonic; the final value wins.
                        ptc.name = name;
                    }
                    ptc.args_buf.push_str(&arguments);
                }
                Some(Ok(ResponseEvent::Usage {
                    input_tokens,
                    output_tokens,
                })) => {
                    debug!(input_tokens, output_tokens, "turn usage");
                }
                Some(Ok(ResponseEvent::Done)) => break,
                Some(Ok(ResponseEvent::Error(e))) => {
                    warn!("model stream error: {e}");
                }
            }
        }

        close_brackets(tx, dialog_id, &mut chat_open, &mut reasoning_open).await;

        if let Some(e) = stream_error {
            persist_partial(deps, dialog_id, &text, &reasoning);
            return Err(TurnError::Provider(e));
        }

        // Reassemble tool calls, ordered by stream index.
        let mut pending_sorted: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
        pending_sorted.sort_by_key(|(idx, _)| *idx);
        let mut calls: Vec<ReconstructedCall> = Vec::new();
        for (i, (_, ptc)) in pending_sorted.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name");
                continue;
            }
            calls.push(ptc.finish(i));
        }
        let has_calls = !calls.is_empty();

        // Persist the assistant message (text so far + tool calls).
        if !text.is_empty() || has_calls {
            let payload = if has_calls {
                json!({
                    "tool_calls": calls
                        .iter()
                        .map(|c| json!({"id": c.id(), "name": c.name(), "args": c.args()}))
                        .collect::<Vec<_>>()
                })
            } else {
                json!({})
            };
            let idx = deps
                .store
                .append_message(dialog_id, MessageKind::Assistant, &text, &payload)?;
            if !reasoning.is_empty() {
                deps.store.add_reasoning(dialog_id, idx, &reasoning)?;
            }
        }

        if !text.is_empty() {
            messages.push(Message::assistant(text.clone()));
        }

        if !has_calls {
            // Some models occasionally produce a reasoning block with no
            // response or tool call; nudge once or twice before giving up.
            if text.is_empty() && empty_turn_retries < MAX_EMPTY_TURN_RETRIES {
                empty_turn_retries += 1;
                messages.push(Message::user(
                    "You produced no response or tool call. \
                     Please continue with your next action.",
                ));
                continue;
            }
            return Ok(());
        }
        empty_turn_retries = 0;

        for call in &calls {
            messages.push(Message::tool_call(
                call.id(),
                call.name(),
                call.args().to_string(),
            ));
            ctx.current_turn_calls
                .lock()
                .unwrap()
                .insert(call.id().to_string());
            send(
                tx,
                StreamEvent::ToolCall {
                    dialog_id: dialog_id.into(),
                    id: call.id().to_string(),
                    name: call.name().to_string(),
                    args: call.args(),
                },
            )
            .await?;
        }

        let outcomes = execute_batch(
            &deps.registry,
            &deps.locks,
            ctx,
            &deps.store,
            &deps.results,
            &calls,
        )
        .await;

        for outcome in outcomes {
            let idx = deps.store.append_message(
                dialog_id,
                MessageKind::Tool,
                &outcome.model_text,
                &outcome.payload,
            )?;
            drain_tool_events(deps, dialog_id, checkpoint_id, idx, events_rx, tx).await?;
            messages.push(Message::tool_result(
                &outcome.output.call_id,
                outcome.model_text.clone(),
            ));
        }
    }
}

/// Forward tool-emitted events to the stream and the audit trail.
async fn drain_tool_events(
    deps: &ChatDeps,
    dialog_id: &str,
    checkpoint_id: &str,
    message_idx: i64,
    events_rx: &mut mpsc::Receiver<ToolEvent>,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), TurnError> {
    while let Ok(event) = events_rx.try_recv() {
        match event {
            ToolEvent::FileEdit { file, diff } => {
                let rel = std::path::Path::new(&file)
                    .strip_prefix(&deps.workdir)
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| file.clone());
                if let Err(e) = deps.store.record_file_edit(
                    dialog_id,
                    &rel,
                    &diff,
                    Some(checkpoint_id),
                    message_idx,
                ) {
                    warn!(file = %rel, "failed to record file edit: {e}");
                }
                send(
                    tx,
                    StreamEvent::FileEdit {
                        dialog_id: dialog_id.into(),
                        file,
                        diff,
                    },
                )
                .await?;
            }
            ToolEvent::TitleGenerated { title } => {
                debug!(dialog_id, title = %title, "title generated by tool");
            }
        }
    }
    Ok(())
}

async fn close_brackets(
    tx: &mpsc::Sender<StreamEvent>,
    dialog_id: &str,
    chat_open: &mut bool,
    reasoning_open: &mut bool,
) {
    if *reasoning_open {
        let _ = tx
            .send(StreamEvent::ReasoningEnd {
                dialog_id: dialog_id.into(),
            })
            .await;
        *reasoning_open = false;
    }
    if *chat_open {
        let _ = tx
            .send(StreamEvent::ChatEnd {
                dialog_id: dialog_id.into(),
            })
            .await;
        *chat_open = false;
    }
}

/// Keep whatever the model already produced when a turn dies mid-stream.
fn persist_partial(deps: &ChatDeps, dialog_id: &str, text: &str, reasoning: &str) {
    if text.is_empty() && reasoning.is_empty() {
        return;
    }
    match deps
        .store
        .append_message(dialog_id, MessageKind::Assistant, text, &json!({}))
    {
        Ok(idx) if !reasoning.is_empty() => {
            if let Err(e) = deps.store.add_reasoning(dialog_id, idx, reasoning) {
                warn!("failed to persist partial reasoning: {e}");
            }
        }
        Ok(_) => {}
        Err(e) => warn!("failed to persist partial assistant message: {e}"),
    }
}

async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), TurnError> {
    // A closed channel means the client went away; treat it as cancellation.
    tx.send(event).await.map_err(|_| TurnError::Cancelled)
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Accumulator for one tool call's stream fragments.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    fn finish(self, position: usize) -> ReconstructedCall {
        let id = if self.id.is_empty() {
            // An id is required to round-trip results; synthesize one rather
            // than corrupting the history sent back to the provider.
            warn!(tool_name = %self.name, "tool call had empty id; generating synthetic id");
            format!("tc_synthetic_{position}")
        } else {
            self.id
        };

        if self.args_buf.is_empty() {
            return ReconstructedCall::Parsed(ToolCall {
                id,
                name: self.name,
                args: json!({}),
            });
        }
        match serde_json::from_str(&self.args_buf) {
            Ok(args) => ReconstructedCall::Parsed(ToolCall {
                id,
                name: self.name,
                args,
            }),
            Err(parse_err) => match attempt_json_repair(&self.args_buf) {
                Some(args) => {
                    warn!(tool_name = %self.name, "repaired invalid JSON tool arguments");
                    ReconstructedCall::Parsed(ToolCall {
                        id,
                        name: self.name,
                        args,
                    })
                }
                None => ReconstructedCall::Malformed {
                    id,
                    name: self.name,
                    error: parse_err.to_string(),
                },
            },
        }
    }
}

/// Attempt to repair common JSON syntax errors from streamed arguments:
/// invalid escape sequences inside strings and truncated objects.
fn attempt_json_repair(raw: &str) -> Option<serde_json::Value> {
    let fixed = fix_invalid_json_escapes(raw);
    if let Ok(v) = serde_json::from_str(&fixed) {
        return Some(v);
    }

    // Close a truncated string and/or object.
    if !fixed.trim_end().ends_with('}') {
        let mut completed = fixed;
        let quote_count = completed.chars().filter(|&c| c == '"').count();
        if quote_count % 2 == 1 {
            completed.push('"');
        }
        completed.push('}');
        if let Ok(v) = serde_json::from_str(&completed) {
            return Some(v);
        }
    }
    None
}

/// Replace invalid escape sequences inside string values with an escaped
/// backslash so serde_json can parse the result.
fn fix_invalid_json_escapes(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len() + 16);
    let mut chars = raw.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
