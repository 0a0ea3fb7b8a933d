// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end turn tests against a scripted provider.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use smithy_config::Config;
use smithy_dialogs::{DialogIndex, DialogStore, MessageKind, ToolResultStore};
use smithy_checkpoints::VersioningTracker;
use smithy_model::{MockProvider, ProviderSet, ResponseEvent};
use smithy_rag::RagIndex;
use smithy_tools::{builtin::register_builtin, PathLocks, ToolRegistry};

use crate::{ChatDeps, ChatRequest, ChatService, IncomingMessage, StreamEvent};

struct Fixture {
    _dir: tempfile::TempDir,
    workdir: std::path::PathBuf,
    service: ChatService,
    dialog_id: String,
    store: DialogStore,
    results: ToolResultStore,
}

fn fixture(turns: Vec<Vec<ResponseEvent>>) -> Fixture {
    fixture_with_config(turns, Config::default())
}

fn fixture_with_config(turns: Vec<Vec<ResponseEvent>>, config: Config) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().to_path_buf();
    let state = workdir.join(".agentsmithy");

    let index = Arc::new(DialogIndex::open(&state.join("dialogs")).unwrap());
    let dialog = index.create_dialog().unwrap();
    let store = DialogStore::open(state.join("dialogs/messages.sqlite")).unwrap();
    let results = ToolResultStore::new(state.join("dialogs"));
    let tracker = Arc::new(
        VersioningTracker::open(
            &workdir,
            &state.join("dialogs").join(&dialog.id).join("checkpoints"),
            vec![],
        )
        .unwrap(),
    );
    let rag = Arc::new(RagIndex::open(&workdir, &state.join("rag"), None).unwrap());

    let mut registry = ToolRegistry::new();
    register_builtin(&mut registry);

    let deps = ChatDeps {
        workdir: workdir.clone(),
        config: Arc::new(config),
        providers: ProviderSet::uniform(Arc::new(MockProvider::new(turns))),
        registry: Arc::new(registry),
        store: store.clone(),
        results: results.clone(),
        index,
        tracker,
        rag,
        locks: Arc::new(PathLocks::new()),
        ide: Some("vscode".into()),
    };
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    Fixture {
        _dir: dir,
        workdir,
        service: ChatService::new(deps, shutdown_rx),
        dialog_id: dialog.id,
        store,
        results,
    }
}

fn request(text: &str) -> ChatRequest {
    ChatRequest {
        messages: vec![IncomingMessage {
            role: "user".into(),
            content: text.into(),
        }],
        context: None,
        stream: true,
        dialog_id: None,
    }
}

async fn run_and_collect(fx: &Fixture, req: ChatRequest) -> Vec<StreamEvent> {
    let (tx, mut rx) = mpsc::channel(256);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    fx.service.chat(&fx.dialog_id, req, tx, cancel_rx).await;
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

fn types(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.wire_type()).collect()
}

fn args_for(path: &str, content: &str) -> String {
    serde_json::json!({"path": path, "content": content}).to_string()
}

fn tool_call_turn(id: &str, name: &str, args: &str) -> Vec<ResponseEvent> {
    // Arguments split across fragments the way providers stream them.
    let mid = args.len() / 2;
    vec![
        ResponseEvent::ToolCallDelta {
            index: 0,
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
        },
        ResponseEvent::ToolCallDelta {
            index: 0,
            id: String::new(),
            name: String::new(),
            arguments: args[..mid].to_string(),
        },
        ResponseEvent::ToolCallDelta {
            index: 0,
            id: String::new(),
            name: String::new(),
            arguments: args[mid..].to_string(),
        },
        ResponseEvent::Done,
    ]
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_only_turn_brackets_chat_and_finishes() {
    let fx = fixture(vec![vec![
        ResponseEvent::TextDelta("Hello ".into()),
        ResponseEvent::TextDelta("there".into()),
        ResponseEvent::Done,
    ]]);
    let events = run_and_collect(&fx, request("hi")).await;
    assert_eq!(
        types(&events),
        vec!["user", "chat_start", "chat", "chat", "chat_end", "done"]
    );

    // The user message carries its pre-turn checkpoint and session.
    match &events[0] {
        StreamEvent::User {
            checkpoint, session, ..
        } => {
            assert!(!checkpoint.is_empty());
            assert_eq!(session, "session_1");
        }
        other => panic!("unexpected first event: {other:?}"),
    }

    // Persisted: user + assistant.
    let page = fx.store.history(&fx.dialog_id, 10, None).unwrap();
    assert_eq!(page.total_events, 2);
}

#[tokio::test]
async fn reasoning_brackets_precede_chat_brackets() {
    let fx = fixture(vec![vec![
        ResponseEvent::ReasoningDelta("thinking".into()),
        ResponseEvent::TextDelta("answer".into()),
        ResponseEvent::Done,
    ]]);
    let events = run_and_collect(&fx, request("why?")).await;
    assert_eq!(
        types(&events),
        vec![
            "user",
            "reasoning_start",
            "reasoning",
            "reasoning_end",
            "chat_start",
            "chat",
            "chat_end",
            "done"
        ]
    );

    // Reasoning is stored out-of-band, linked to the assistant message.
    let reasoning = fx.store.get_reasoning(&fx.dialog_id, 1).unwrap();
    assert_eq!(reasoning.as_deref(), Some("thinking"));
}

#[tokio::test]
async fn tool_call_turn_writes_file_and_orders_events() {
    let fx = fixture(vec![
        tool_call_turn("call_1", "write_to_file", &args_for("main.py", "print('hi')\n")),
        vec![ResponseEvent::TextDelta("Created main.py".into()), ResponseEvent::Done],
    ]);
    let events = run_and_collect(&fx, request("Create main.py that prints hi")).await;

    assert_eq!(
        types(&events),
        vec![
            "user",
            "tool_call",
            "file_edit",
            "chat_start",
            "chat",
            "chat_end",
            "done"
        ]
    );
    match &events[1] {
        StreamEvent::ToolCall { name, args, .. } => {
            assert_eq!(name, "write_to_file");
            assert_eq!(args["path"], "main.py");
        }
        other => panic!("unexpected: {other:?}"),
    }
    match &events[2] {
        StreamEvent::FileEdit { file, diff, .. } => {
            assert!(file.ends_with("main.py"));
            assert!(diff.contains("+print('hi')"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    assert_eq!(
        std::fs::read_to_string(fx.workdir.join("main.py")).unwrap(),
        "print('hi')\n"
    );

    // Stored tool result metadata matches the stored body byte-for-byte.
    let metas = fx.store.list_tool_result_meta(&fx.dialog_id).unwrap();
    assert_eq!(metas.len(), 1);
    let body = fx.results.load(&fx.dialog_id, "call_1").unwrap().unwrap();
    assert_eq!(metas[0].size_bytes, body.to_string().len() as u64);

    // The file edit landed in the audit trail.
    let edits = fx.store.list_file_edits(&fx.dialog_id).unwrap();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].file_path, "main.py");
}

#[tokio::test]
async fn two_tool_calls_execute_in_model_order() {
    let args_a = args_for("a.txt", "A");
    let args_b = args_for("b.txt", "B");
    let fx = fixture(vec![
        vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: "call_a".into(),
                name: "write_to_file".into(),
                arguments: args_a,
            },
            ResponseEvent::ToolCallDelta {
                index: 1,
                id: "call_b".into(),
                name: "write_to_file".into(),
                arguments: args_b,
            },
            ResponseEvent::Done,
        ],
        vec![ResponseEvent::TextDelta("Both created".into()), ResponseEvent::Done],
    ]);
    let events = run_and_collect(&fx, request("Create a.txt and b.txt")).await;

    let tool_calls: Vec<&StreamEvent> = events
        .iter()
        .filter(|e| e.wire_type() == "tool_call")
        .collect();
    assert_eq!(tool_calls.len(), 2);
    match (tool_calls[0], tool_calls[1]) {
        (
            StreamEvent::ToolCall { id: id0, .. },
            StreamEvent::ToolCall { id: id1, .. },
        ) => {
            assert_eq!(id0, "call_a");
            assert_eq!(id1, "call_b");
        }
        _ => unreachable!(),
    }
    assert_eq!(std::fs::read_to_string(fx.workdir.join("a.txt")).unwrap(), "A");
    assert_eq!(std::fs::read_to_string(fx.workdir.join("b.txt")).unwrap(), "B");

    // Both files show as added against the approved base.
    let fx_tracker_changed = fx
        .service_tracker()
        .get_staged_files()
        .await
        .unwrap();
    let paths: Vec<&str> = fx_tracker_changed.iter().map(|c| c.path.as_str()).collect();
    assert!(paths.contains(&"a.txt"));
    assert!(paths.contains(&"b.txt"));
}

#[tokio::test]
async fn malformed_tool_arguments_become_validation_result_without_execution() {
    let fx = fixture(vec![
        vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: "call_bad".into(),
                name: "write_to_file".into(),
                arguments: "{{{ not json".into(),
            },
            ResponseEvent::Done,
        ],
        vec![ResponseEvent::TextDelta("hm".into()), ResponseEvent::Done],
    ]);
    let events = run_and_collect(&fx, request("write something")).await;
    assert!(events.iter().any(|e| e.wire_type() == "tool_call"));
    // No file_edit: the tool never ran.
    assert!(!events.iter().any(|e| e.wire_type() == "file_edit"));

    let body = fx.results.load(&fx.dialog_id, "call_bad").unwrap().unwrap();
    assert_eq!(body["type"], "tool_error");
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn round_budget_exhaustion_fails_with_tool_loop_exceeded() {
    let mut config = Config::default();
    config.agent.max_tool_rounds = 1;
    // The model keeps calling tools past the budget.
    let fx = fixture_with_config(
        vec![
            tool_call_turn("c1", "list_files", "{}"),
            tool_call_turn("c2", "list_files", "{}"),
        ],
        config,
    );
    let events = run_and_collect(&fx, request("loop forever")).await;
    let last_two: Vec<&'static str> = types(&events).into_iter().rev().take(2).collect();
    assert_eq!(last_two, vec!["done", "error"]);
    match events.iter().find(|e| e.wire_type() == "error").unwrap() {
        StreamEvent::Error { code, .. } => assert_eq!(code, "tool_loop_exceeded"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn request_without_user_message_is_validation_error_then_done() {
    let fx = fixture(vec![]);
    let req = ChatRequest {
        messages: vec![],
        context: None,
        stream: true,
        dialog_id: None,
    };
    let events = run_and_collect(&fx, req).await;
    assert_eq!(types(&events), vec!["error", "done"]);
    match &events[0] {
        StreamEvent::Error { code, .. } => assert_eq!(code, "validation"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn every_stream_ends_with_exactly_one_done() {
    let fx = fixture(vec![vec![
        ResponseEvent::TextDelta("ok".into()),
        ResponseEvent::Done,
    ]]);
    let events = run_and_collect(&fx, request("hi")).await;
    let done_count = events.iter().filter(|e| e.wire_type() == "done").count();
    assert_eq!(done_count, 1);
    assert_eq!(events.last().unwrap().wire_type(), "done");
}

#[tokio::test]
async fn user_messages_persist_checkpoint_and_session() {
    let fx = fixture(vec![vec![
        ResponseEvent::TextDelta("sure".into()),
        ResponseEvent::Done,
    ]]);
    run_and_collect(&fx, request("record me")).await;
    let page = fx.store.history(&fx.dialog_id, 10, None).unwrap();
    let user_event = &page.events[0];
    assert_eq!(user_event["type"], "user");
    assert!(user_event["checkpoint_id"].as_str().is_some());
    assert_eq!(user_event["session_name"], "session_1");
    assert_eq!(user_event["idx"], 0);
}

impl Fixture {
    fn service_tracker(&self) -> Arc<VersioningTracker> {
        // Rebuild a tracker over the same on-disk state.
        let state = self.workdir.join(".agentsmithy");
        Arc::new(
            VersioningTracker::open(
                &self.workdir,
                &state.join("dialogs").join(&self.dialog_id).join("checkpoints"),
                vec![],
            )
            .unwrap(),
        )
    }
}

#[tokio::test]
async fn tool_messages_store_lazy_reference_not_body() {
    let fx = fixture(vec![
        tool_call_turn("call_1", "read_file", "{\"path\": \"data.txt\"}"),
        vec![ResponseEvent::TextDelta("read it".into()), ResponseEvent::Done],
    ]);
    std::fs::write(fx.workdir.join("data.txt"), "x\n".repeat(1000)).unwrap();
    run_and_collect(&fx, request("read data.txt")).await;

    let page = fx.store.history(&fx.dialog_id, 10, None).unwrap();
    let tool_event = page
        .events
        .iter()
        .find(|e| e["type"] == "tool")
        .expect("tool message persisted");
    assert_eq!(tool_event["tool_name"], "read_file");
    assert_eq!(tool_event["status"], "ok");
    assert_eq!(
        tool_event["result_ref"],
        "tool_results/call_1.json"
    );
    let preview = tool_event["preview"].as_str().unwrap();
    assert!(preview.len() <= 500);
}
