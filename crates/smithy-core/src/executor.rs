// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Concurrent dispatch of one assistant message's tool calls.
//!
//! Calls run in parallel tasks; contention is resolved by locks, not
//! ordering: file-mutating tools hold per-path exclusive locks and
//! `run_command` holds the workdir lock.  Results come back in the order
//! the model emitted the calls so history serialization stays stable.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::warn;

use smithy_dialogs::{DialogStore, ToolResultMeta, ToolResultStore};
use smithy_tools::{
    truncate_preview, PathLocks, Tool, ToolCall, ToolContext, ToolErrorCode, ToolOutput,
    ToolRegistry,
};

/// Preview budget for the inline tool-result reference.
const PREVIEW_CHARS: usize = 500;

/// A tool call as reconstructed from the stream: either parsed and ready to
/// dispatch, or malformed (bad JSON arguments) and answered without
/// invoking the tool.
#[derive(Debug, Clone)]
pub enum ReconstructedCall {
    Parsed(ToolCall),
    Malformed {
        id: String,
        name: String,
        error: String,
    },
}

impl ReconstructedCall {
    pub fn id(&self) -> &str {
        match self {
            ReconstructedCall::Parsed(c) => &c.id,
            ReconstructedCall::Malformed { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ReconstructedCall::Parsed(c) => &c.name,
            ReconstructedCall::Malformed { name, .. } => name,
        }
    }

    pub fn args(&self) -> serde_json::Value {
        match self {
            ReconstructedCall::Parsed(c) => c.args.clone(),
            ReconstructedCall::Malformed { .. } => serde_json::Value::Null,
        }
    }
}

/// One executed call with everything the history layer needs.
pub struct ExecOutcome {
    pub output: ToolOutput,
    /// Lazy-reference payload persisted with the tool message.
    pub payload: serde_json::Value,
    /// Content fed back to the model (the serialized lazy reference).
    pub model_text: String,
}

/// Execute a batch, persist full results out-of-band, and return outcomes
/// in call order.
pub async fn execute_batch(
    registry: &Arc<ToolRegistry>,
    locks: &Arc<PathLocks>,
    ctx: &ToolContext,
    store: &DialogStore,
    results: &ToolResultStore,
    calls: &[ReconstructedCall],
) -> Vec<ExecOutcome> {
    let mut tasks = Vec::with_capacity(calls.len());
    for call in calls {
        match call {
            ReconstructedCall::Parsed(tc) => {
                let registry = Arc::clone(registry);
                let locks = Arc::clone(locks);
                let ctx = ctx.clone();
                let tc = tc.clone();
                tasks.push(Some(tokio::spawn(async move {
                    let _guards: Vec<tokio::sync::OwnedMutexGuard<()>> =
                        match registry.get(&tc.name) {
                            Some(tool) if tool.takes_workdir_lock() => {
                                vec![locks.acquire_workdir().await]
                            }
                            Some(tool) => {
                                let paths = tool.mutates_paths(&tc.args);
                                if paths.is_empty() {
                                    Vec::new()
                                } else {
                                    locks.acquire_paths(&paths).await
                                }
                            }
                            None => Vec::new(),
                        };
                    registry.execute(&tc, &ctx).await
                })));
            }
            ReconstructedCall::Malformed { .. } => tasks.push(None),
        }
    }

    let mut outcomes = Vec::with_capacity(calls.len());
    for (call, task) in calls.iter().zip(tasks) {
        let output = match (call, task) {
            (_, Some(task)) => match task.await {
                Ok(output) => output,
                Err(e) => {
                    warn!(call_id = %call.id(), "tool task panicked: {e}");
                    ToolOutput::error(
                        call.id(),
                        call.name(),
                        ToolErrorCode::Exception,
                        format!("tool execution panicked: {e}"),
                    )
                }
            },
            (ReconstructedCall::Malformed { id, name, error }, None) => ToolOutput::error(
                id,
                name,
                ToolErrorCode::Validation,
                format!("invalid JSON tool arguments: {error}"),
            ),
            (ReconstructedCall::Parsed(tc), None) => unreachable!(
                "parsed call {} must have a task",
                tc.id
            ),
        };
        outcomes.push(persist_outcome(call.name(), output, ctx, store, results));
    }
    outcomes
}

/// Store the full result out-of-band and build the lazy in-history
/// reference.
fn persist_outcome(
    tool_name: &str,
    output: ToolOutput,
    ctx: &ToolContext,
    store: &DialogStore,
    results: &ToolResultStore,
) -> ExecOutcome {
    let status = output
        .error_code()
        .map(str::to_string)
        .unwrap_or_else(|| "ok".to_string());
    let pretty =
        serde_json::to_string_pretty(&output.result).unwrap_or_else(|_| "{}".to_string());
    let preview = truncate_preview(&pretty, PREVIEW_CHARS);

    let meta = ToolResultMeta {
        tool_call_id: output.call_id.clone(),
        dialog_id: ctx.dialog_id.clone(),
        tool_name: tool_name.to_string(),
        status: status.clone(),
        size_bytes: output.size_bytes(),
        summary: output.summary.clone(),
        preview: preview.clone(),
        created_at: Utc::now(),
    };
    if let Err(e) = results.save(&meta, &output.result) {
        warn!(call_id = %output.call_id, "failed to store tool result: {e}");
    }
    if let Err(e) = store.put_tool_result_meta(&meta) {
        warn!(call_id = %output.call_id, "failed to store tool result meta: {e}");
    }

    let payload = json!({
        "tool_call_id": output.call_id,
        "tool_name": tool_name,
        "status": status,
        "size_bytes": output.size_bytes(),
        "summary": output.summary,
        "preview": preview,
        "result_ref": format!("tool_results/{}.json", output.call_id),
    });
    let model_text = payload.to_string();

    ExecOutcome {
        output,
        payload,
        model_text,
    }
}
