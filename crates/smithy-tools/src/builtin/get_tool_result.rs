// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolErrorCode, ToolOutput};
use crate::ToolContext;

pub struct GetToolResultTool;

#[async_trait]
impl Tool for GetToolResultTool {
    fn name(&self) -> &str {
        "get_tool_result"
    }

    fn description(&self) -> &str {
        "Fetch the full stored result of an earlier tool call in this dialog.\n\
         Tool messages in the history carry only a summary and a truncated\n\
         preview; use this when you need the complete output again.\n\
         Only results from previous turns are available."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tool_call_id": {
                    "type": "string",
                    "description": "The id of the earlier tool call"
                }
            },
            "required": ["tool_call_id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        let target = match call.args.get("tool_call_id").and_then(|v| v.as_str()) {
            Some(t) => t.to_string(),
            None => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Validation,
                    "missing required parameter 'tool_call_id'",
                )
            }
        };

        debug!(target = %target, "get_tool_result tool");

        if ctx.current_turn_calls.lock().unwrap().contains(&target) {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Validation,
                "not for current-turn calls",
            );
        }

        match ctx.results.load(&ctx.dialog_id, &target) {
            Ok(Some(result)) => ToolOutput::ok(
                &call.id,
                json!({"tool_call_id": target, "result": result}),
                format!("Loaded result for {target}"),
            ),
            Ok(None) => ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::NotFound,
                format!("no stored result for tool call {target}"),
            ),
            Err(e) => ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("result store error: {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
