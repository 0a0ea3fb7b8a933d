// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dialog ids sort lexicographically by creation time:
/// `YYYYMMDDHHMMSSmmm` plus a short counter to break same-millisecond ties.
pub fn new_dialog_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static CTR: AtomicU32 = AtomicU32::new(0);
    let n = CTR.fetch_add(1, Ordering::Relaxed) % 1000;
    format!("{}{n:03}", Utc::now().format("%Y%m%d%H%M%S%3f"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogMeta {
    pub id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active_session: String,
    pub initial_checkpoint: Option<String>,
    pub last_approved_at: Option<DateTime<Utc>>,
}

impl DialogMeta {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: new_dialog_id(),
            title: None,
            created_at: now,
            updated_at: now,
            active_session: "session_1".to_string(),
            initial_checkpoint: None,
            last_approved_at: None,
        }
    }
}

impl Default for DialogMeta {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    Tool,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Assistant => "assistant",
            MessageKind::Tool => "tool",
            MessageKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageKind::User),
            "assistant" => Some(MessageKind::Assistant),
            "tool" => Some(MessageKind::Tool),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }
}

/// One persisted message.  `payload` carries the kind-specific fields:
/// - user: `{checkpoint_id, session_name}`
/// - assistant: `{tool_calls: [{id, name, args}]}`
/// - tool: `{tool_call_id, tool_name, status, size_bytes, summary, preview,
///   result_ref}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub idx: i64,
    pub kind: MessageKind,
    pub content: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One page of dialog history, cursor-paginated by `idx`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub events: Vec<serde_json::Value>,
    pub total_events: i64,
    pub has_more: bool,
    pub first_idx: Option<i64>,
    pub last_idx: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultMeta {
    pub tool_call_id: String,
    pub dialog_id: String,
    pub tool_name: String,
    pub status: String,
    pub size_bytes: u64,
    pub summary: String,
    pub preview: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEditRecord {
    pub dialog_id: String,
    pub file_path: String,
    pub diff: String,
    pub checkpoint_id: Option<String>,
    pub message_idx: i64,
    pub created_at: DateTime<Utc>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_ids_are_sortable_and_unique() {
        let a = new_dialog_id();
        let b = new_dialog_id();
        assert_ne!(a, b);
        assert!(a <= b, "ids must sort by creation order: {a} vs {b}");
        assert!(a.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn message_kind_round_trips_through_str() {
        for kind in [
            MessageKind::User,
            MessageKind::Assistant,
            MessageKind::Tool,
            MessageKind::System,
        ] {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MessageKind::parse("bogus"), None);
    }

    #[test]
    fn new_dialog_starts_on_session_1_without_title() {
        let d = DialogMeta::new();
        assert_eq!(d.active_session, "session_1");
        assert!(d.title.is_none());
        assert!(d.initial_checkpoint.is_none());
    }
}
