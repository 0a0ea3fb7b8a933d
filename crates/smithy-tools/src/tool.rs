// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::ToolContext;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// Failure classes encoded into tool results.
///
/// Failures are values, not exceptions: the structured error is stored as
/// the tool's result and shown to the model, which may self-correct.  The
/// agent loop never sees a `Result::Err` from tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorCode {
    Validation,
    NotFound,
    Permission,
    Timeout,
    Cancelled,
    Exception,
    ExecFailed,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorCode::Validation => "validation",
            ToolErrorCode::NotFound => "not_found",
            ToolErrorCode::Permission => "permission",
            ToolErrorCode::Timeout => "timeout",
            ToolErrorCode::Cancelled => "cancelled",
            ToolErrorCode::Exception => "exception",
            ToolErrorCode::ExecFailed => "exec_failed",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ToolErrorCode::Validation => "ValidationError",
            ToolErrorCode::NotFound => "NotFoundError",
            ToolErrorCode::Permission => "PermissionError",
            ToolErrorCode::Timeout => "TimeoutError",
            ToolErrorCode::Cancelled => "CancelledError",
            ToolErrorCode::Exception => "RuntimeError",
            ToolErrorCode::ExecFailed => "ExecutionError",
        }
    }
}

/// The result of executing a tool: the full structured JSON plus a short
/// human summary used for the lazy reference in message history.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Full structured result, stored out-of-band by the executor.
    pub result: Value,
    /// One-line summary, e.g. `Read file: main.py (12 lines)`.
    pub summary: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, result: Value, summary: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            result,
            summary: summary.into(),
            is_error: false,
        }
    }

    pub fn error(
        call_id: impl Into<String>,
        tool_name: &str,
        code: ToolErrorCode,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            call_id: call_id.into(),
            result: json!({
                "type": "tool_error",
                "name": tool_name,
                "code": code.as_str(),
                "error": error,
                "error_type": code.error_type(),
            }),
            summary: format!("{tool_name} failed ({})", code.as_str()),
            is_error: true,
        }
    }

    /// The error code, when this output is a tool error.
    pub fn error_code(&self) -> Option<&str> {
        if !self.is_error {
            return None;
        }
        self.result.get("code").and_then(|c| c.as_str())
    }

    /// Serialized size of the full result in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.result.to_string().len() as u64
    }
}

/// Trait implemented by every tool the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Workdir-relative paths this invocation will mutate; the executor
    /// takes per-path exclusive locks for them.  Empty for read-only tools.
    fn mutates_paths(&self, _args: &Value) -> Vec<String> {
        Vec::new()
    }
    /// True for tools whose side effects cannot be scoped to declared paths
    /// (`run_command`); the executor serializes them behind a workdir lock.
    fn takes_workdir_lock(&self) -> bool {
        false
    }
    /// Execute the tool.  Failures are wrapped in [`ToolOutput::error`].
    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_output_carries_the_taxonomy_shape() {
        let out = ToolOutput::error("c1", "read_file", ToolErrorCode::NotFound, "no such file");
        assert!(out.is_error);
        assert_eq!(out.result["type"], "tool_error");
        assert_eq!(out.result["name"], "read_file");
        assert_eq!(out.result["code"], "not_found");
        assert_eq!(out.result["error"], "no such file");
        assert_eq!(out.result["error_type"], "NotFoundError");
        assert_eq!(out.error_code(), Some("not_found"));
    }

    #[test]
    fn ok_output_has_no_error_code() {
        let out = ToolOutput::ok("c1", json!({"x": 1}), "done");
        assert!(!out.is_error);
        assert!(out.error_code().is_none());
    }

    #[test]
    fn size_bytes_matches_serialized_result() {
        let result = json!({"stdout": "hello"});
        let out = ToolOutput::ok("c1", result.clone(), "s");
        assert_eq!(out.size_bytes(), result.to_string().len() as u64);
    }

    #[test]
    fn every_code_maps_to_wire_string() {
        let codes = [
            (ToolErrorCode::Validation, "validation"),
            (ToolErrorCode::NotFound, "not_found"),
            (ToolErrorCode::Permission, "permission"),
            (ToolErrorCode::Timeout, "timeout"),
            (ToolErrorCode::Cancelled, "cancelled"),
            (ToolErrorCode::Exception, "exception"),
            (ToolErrorCode::ExecFailed, "exec_failed"),
        ];
        for (code, wire) in codes {
            assert_eq!(code.as_str(), wire);
        }
    }
}
