// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end scenarios across the chat service, checkpointing, and tools,
//! driven by a scripted model provider.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use smithy_checkpoints::{ChangeStatus, VersioningTracker};
use smithy_config::Config;
use smithy_core::{ChatDeps, ChatRequest, ChatService, IncomingMessage, StreamEvent};
use smithy_dialogs::{DialogIndex, DialogStore, ToolResultStore};
use smithy_model::{MockProvider, ProviderSet, ResponseEvent};
use smithy_rag::RagIndex;
use smithy_tools::{builtin::register_builtin, PathLocks, ToolRegistry};

struct Project {
    _dir: tempfile::TempDir,
    workdir: std::path::PathBuf,
    dialog_id: String,
    tracker: Arc<VersioningTracker>,
    store: DialogStore,
    index: Arc<DialogIndex>,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().to_path_buf();
        let state = workdir.join(".agentsmithy");
        let index = Arc::new(DialogIndex::open(&state.join("dialogs")).unwrap());
        let dialog = index.create_dialog().unwrap();
        let store = DialogStore::open(state.join("dialogs/messages.sqlite")).unwrap();
        let tracker = Arc::new(
            VersioningTracker::open(
                &workdir,
                &state.join("dialogs").join(&dialog.id).join("checkpoints"),
                vec![],
            )
            .unwrap(),
        );
        Self {
            _dir: dir,
            workdir,
            dialog_id: dialog.id,
            tracker,
            store,
            index,
        }
    }

    fn service(&self, turns: Vec<Vec<ResponseEvent>>) -> ChatService {
        let state = self.workdir.join(".agentsmithy");
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry);
        let deps = ChatDeps {
            workdir: self.workdir.clone(),
            config: Arc::new(Config::default()),
            providers: ProviderSet::uniform(Arc::new(MockProvider::new(turns))),
            registry: Arc::new(registry),
            store: self.store.clone(),
            results: ToolResultStore::new(state.join("dialogs")),
            index: self.index.clone(),
            tracker: self.tracker.clone(),
            rag: Arc::new(RagIndex::open(&self.workdir, &state.join("rag"), None).unwrap()),
            locks: Arc::new(PathLocks::new()),
            ide: None,
        };
        let (_tx, shutdown_rx) = watch::channel(false);
        ChatService::new(deps, shutdown_rx)
    }

    async fn turn(&self, turns: Vec<Vec<ResponseEvent>>, prompt: &str) -> Vec<StreamEvent> {
        let service = self.service(turns);
        let (tx, mut rx) = mpsc::channel(256);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        service
            .chat(
                &self.dialog_id,
                ChatRequest {
                    messages: vec![IncomingMessage {
                        role: "user".into(),
                        content: prompt.into(),
                    }],
                    context: None,
                    stream: true,
                    dialog_id: None,
                },
                tx,
                cancel_rx,
            )
            .await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }
}

fn write_file_turn(id: &str, path: &str, content: &str) -> Vec<ResponseEvent> {
    vec![
        ResponseEvent::ToolCallDelta {
            index: 0,
            id: id.into(),
            name: "write_to_file".into(),
            arguments: serde_json::json!({"path": path, "content": content}).to_string(),
        },
        ResponseEvent::Done,
    ]
}

fn command_turn(id: &str, command: &str) -> Vec<ResponseEvent> {
    vec![
        ResponseEvent::ToolCallDelta {
            index: 0,
            id: id.into(),
            name: "run_command".into(),
            arguments: serde_json::json!({"command": command}).to_string(),
        },
        ResponseEvent::Done,
    ]
}

fn text_turn(text: &str) -> Vec<ResponseEvent> {
    vec![ResponseEvent::TextDelta(text.into()), ResponseEvent::Done]
}

fn user_checkpoint(events: &[StreamEvent]) -> String {
    events
        .iter()
        .find_map(|e| match e {
            StreamEvent::User { checkpoint, .. } => Some(checkpoint.clone()),
            _ => None,
        })
        .expect("user event present")
}

// ── S1: create, write, approve ────────────────────────────────────────────────

#[tokio::test]
async fn create_write_approve_flow() {
    let project = Project::new();

    let events = project
        .turn(
            vec![
                write_file_turn("call_1", "main.py", "print('hi')\n"),
                text_turn("Created main.py"),
            ],
            "Create main.py that prints hi",
        )
        .await;

    // Stream shape: user → tool_call → file_edit → bracketed chat → done.
    let kinds: Vec<&str> = events.iter().map(|e| e.wire_type()).collect();
    assert_eq!(
        kinds,
        vec!["user", "tool_call", "file_edit", "chat_start", "chat", "chat_end", "done"]
    );
    assert_eq!(
        std::fs::read_to_string(project.workdir.join("main.py")).unwrap(),
        "print('hi')\n"
    );

    // Pending changes show the new file; approval clears them.
    let info = project.tracker.session_info().await.unwrap();
    assert!(info.has_unapproved);
    assert!(info
        .changed_files
        .iter()
        .any(|c| c.path == "main.py" && c.status == ChangeStatus::Added));

    let outcome = project.tracker.approve_all(None).await.unwrap();
    assert!(outcome.commits_approved >= 1);
    assert_eq!(outcome.new_session, "session_2");

    let info = project.tracker.session_info().await.unwrap();
    assert!(!info.has_unapproved);
    assert!(info.changed_files.is_empty());
}

// ── S2: restore undoes a turn ─────────────────────────────────────────────────

#[tokio::test]
async fn restore_undoes_a_delete_turn() {
    let project = Project::new();
    std::fs::write(project.workdir.join("main.py"), "print('hi')\n").unwrap();
    project.tracker.approve_all(None).await.unwrap();

    let events = project
        .turn(
            vec![
                vec![
                    ResponseEvent::ToolCallDelta {
                        index: 0,
                        id: "call_del".into(),
                        name: "delete_file".into(),
                        arguments: serde_json::json!({"path": "main.py"}).to_string(),
                    },
                    ResponseEvent::Done,
                ],
                text_turn("Deleted"),
            ],
            "Delete main.py",
        )
        .await;
    assert!(!project.workdir.join("main.py").exists());

    // The user message's checkpoint captures the state before the turn.
    let checkpoint = user_checkpoint(&events);
    let (outcome, _changed) = project
        .tracker
        .restore_checkpoint(&checkpoint)
        .await
        .unwrap();
    assert_eq!(outcome.restored_to, checkpoint);
    assert_eq!(
        std::fs::read_to_string(project.workdir.join("main.py")).unwrap(),
        "print('hi')\n"
    );

    // The restore itself is on the session chain and can be undone.
    let log = project.tracker.list_checkpoints().await.unwrap();
    assert!(log.last().unwrap().1.starts_with("Restored to "));
}

// ── S3: multi-call transaction ────────────────────────────────────────────────

#[tokio::test]
async fn two_writes_arrive_in_model_order() {
    let project = Project::new();
    let events = project
        .turn(
            vec![
                vec![
                    ResponseEvent::ToolCallDelta {
                        index: 0,
                        id: "call_a".into(),
                        name: "write_to_file".into(),
                        arguments: serde_json::json!({"path": "a.txt", "content": "A"}).to_string(),
                    },
                    ResponseEvent::ToolCallDelta {
                        index: 1,
                        id: "call_b".into(),
                        name: "write_to_file".into(),
                        arguments: serde_json::json!({"path": "b.txt", "content": "B"}).to_string(),
                    },
                    ResponseEvent::Done,
                ],
                text_turn("Created both"),
            ],
            "Create files a.txt with 'A' and b.txt with 'B'",
        )
        .await;

    let calls: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolCall { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(calls, vec!["call_a", "call_b"]);
    assert_eq!(std::fs::read_to_string(project.workdir.join("a.txt")).unwrap(), "A");
    assert_eq!(std::fs::read_to_string(project.workdir.join("b.txt")).unwrap(), "B");

    let changed = project.tracker.get_staged_files().await.unwrap();
    let added: Vec<&str> = changed
        .iter()
        .filter(|c| c.status == ChangeStatus::Added)
        .map(|c| c.path.as_str())
        .collect();
    assert!(added.contains(&"a.txt"));
    assert!(added.contains(&"b.txt"));
}

// ── S4: command-made changes are detectable ───────────────────────────────────

#[tokio::test]
async fn command_deletion_shows_in_staged_files_and_next_tree() {
    let project = Project::new();
    std::fs::write(project.workdir.join("x.txt"), "precious\n").unwrap();
    project.tracker.approve_all(None).await.unwrap();

    project
        .turn(
            vec![command_turn("call_rm", "rm x.txt"), text_turn("Removed")],
            "remove x.txt with the shell",
        )
        .await;
    assert!(!project.workdir.join("x.txt").exists());

    let changed = project.tracker.get_staged_files().await.unwrap();
    let entry = changed.iter().find(|c| c.path == "x.txt").unwrap();
    assert_eq!(entry.status, ChangeStatus::Deleted);
    assert_eq!(entry.base_content.as_deref(), Some("precious\n"));

    // The next checkpoint's tree omits the file: restoring an older
    // checkpoint brings it back, restoring the new one removes it again.
    let after = project.tracker.create_checkpoint("after command").await.unwrap();
    let baseline = project.tracker.list_checkpoints().await.unwrap()[0].0.clone();
    project.tracker.restore_checkpoint(&baseline).await.unwrap();
    assert!(project.workdir.join("x.txt").exists());
    project.tracker.restore_checkpoint(&after).await.unwrap();
    assert!(!project.workdir.join("x.txt").exists());
}

// ── S5: ignored-file force staging ────────────────────────────────────────────

#[tokio::test]
async fn tool_written_ignored_file_is_checkpointed_but_command_made_one_is_not() {
    let project = Project::new();
    std::fs::write(project.workdir.join(".gitignore"), ".venv/\n").unwrap();

    project
        .turn(
            vec![
                write_file_turn("call_cfg", ".venv/config.py", "X = 1\n"),
                text_turn("Written"),
            ],
            "Write a config file to .venv/config.py",
        )
        .await;
    project
        .turn(
            vec![
                command_turn("call_other", "mkdir -p .venv && echo Y=2 > .venv/other.py"),
                text_turn("Done"),
            ],
            "also create .venv/other.py via the shell",
        )
        .await;

    let checkpoint = project.tracker.create_checkpoint("both exist").await.unwrap();

    std::fs::remove_file(project.workdir.join(".venv/config.py")).unwrap();
    std::fs::remove_file(project.workdir.join(".venv/other.py")).unwrap();
    project.tracker.restore_checkpoint(&checkpoint).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(project.workdir.join(".venv/config.py")).unwrap(),
        "X = 1\n",
        "force-staged file must be in the tree"
    );
    assert!(
        !project.workdir.join(".venv/other.py").exists(),
        "command-made ignored file must stay out of the tree"
    );
}

// ── Turn atomicity ────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_result_metadata_matches_stored_body() {
    let project = Project::new();
    project
        .turn(
            vec![
                write_file_turn("call_1", "f.txt", "hello"),
                text_turn("done"),
            ],
            "write f.txt",
        )
        .await;

    let metas = project.store.list_tool_result_meta(&project.dialog_id).unwrap();
    assert_eq!(metas.len(), 1);
    let results = ToolResultStore::new(project.workdir.join(".agentsmithy/dialogs"));
    let body = results
        .load(&project.dialog_id, &metas[0].tool_call_id)
        .unwrap()
        .unwrap();
    assert_eq!(metas[0].size_bytes, body.to_string().len() as u64);
}
