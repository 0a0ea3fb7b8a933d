// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::Serialize;

/// Events streamed to the client over SSE.
///
/// The serialized `type` tags are the wire contract: `user`, `chat_start`,
/// `chat`, `chat_end`, `reasoning_start`, `reasoning`, `reasoning_end`,
/// `summary_start`, `summary_end`, `tool_call`, `file_edit`, `error`,
/// `done`.  `chat_*` and `reasoning_*` pairs form properly nested,
/// non-interleaving brackets; `tool_call` never appears inside an open
/// chat bracket; `done` terminates every stream, preceded by `error` on
/// failure.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    User {
        dialog_id: String,
        content: String,
        checkpoint: String,
        session: String,
    },
    ChatStart {
        dialog_id: String,
    },
    Chat {
        dialog_id: String,
        content: String,
    },
    ChatEnd {
        dialog_id: String,
    },
    ReasoningStart {
        dialog_id: String,
    },
    Reasoning {
        dialog_id: String,
        content: String,
    },
    ReasoningEnd {
        dialog_id: String,
    },
    SummaryStart {
        dialog_id: String,
    },
    SummaryEnd {
        dialog_id: String,
    },
    ToolCall {
        dialog_id: String,
        id: String,
        name: String,
        args: serde_json::Value,
    },
    FileEdit {
        dialog_id: String,
        file: String,
        diff: String,
    },
    Error {
        dialog_id: String,
        code: String,
        message: String,
    },
    Done {
        dialog_id: String,
    },
}

impl StreamEvent {
    /// The wire name carried in the `type` field.
    pub fn wire_type(&self) -> &'static str {
        match self {
            StreamEvent::User { .. } => "user",
            StreamEvent::ChatStart { .. } => "chat_start",
            StreamEvent::Chat { .. } => "chat",
            StreamEvent::ChatEnd { .. } => "chat_end",
            StreamEvent::ReasoningStart { .. } => "reasoning_start",
            StreamEvent::Reasoning { .. } => "reasoning",
            StreamEvent::ReasoningEnd { .. } => "reasoning_end",
            StreamEvent::SummaryStart { .. } => "summary_start",
            StreamEvent::SummaryEnd { .. } => "summary_end",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::FileEdit { .. } => "file_edit",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done { .. } => "done",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_type_tags_match_wire_contract() {
        let ev = StreamEvent::ChatStart {
            dialog_id: "d1".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "chat_start");
        assert_eq!(json["dialog_id"], "d1");
    }

    #[test]
    fn wire_type_agrees_with_serde_tag() {
        let events = vec![
            StreamEvent::User {
                dialog_id: "d".into(),
                content: "x".into(),
                checkpoint: "c".into(),
                session: "session_1".into(),
            },
            StreamEvent::Chat {
                dialog_id: "d".into(),
                content: "x".into(),
            },
            StreamEvent::ChatEnd { dialog_id: "d".into() },
            StreamEvent::ReasoningStart { dialog_id: "d".into() },
            StreamEvent::SummaryEnd { dialog_id: "d".into() },
            StreamEvent::ToolCall {
                dialog_id: "d".into(),
                id: "t".into(),
                name: "read_file".into(),
                args: serde_json::json!({}),
            },
            StreamEvent::FileEdit {
                dialog_id: "d".into(),
                file: "/p/main.py".into(),
                diff: "".into(),
            },
            StreamEvent::Error {
                dialog_id: "d".into(),
                code: "shutdown".into(),
                message: "".into(),
            },
            StreamEvent::Done { dialog_id: "d".into() },
        ];
        for ev in events {
            let json = serde_json::to_value(&ev).unwrap();
            assert_eq!(json["type"], ev.wire_type());
        }
    }

    #[test]
    fn error_event_carries_code_and_message() {
        let ev = StreamEvent::Error {
            dialog_id: "d".into(),
            code: "dialog_busy".into(),
            message: "another turn is running".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["code"], "dialog_busy");
        assert_eq!(json["message"], "another turn is running");
    }
}
