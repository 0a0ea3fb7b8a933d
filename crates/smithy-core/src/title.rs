// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use smithy_dialogs::{DialogIndex, DialogStore, MessageKind};
use smithy_model::{CompletionRequest, Message, ModelProvider, ResponseEvent};
use smithy_tools::{Tool, ToolCall, ToolContext, ToolErrorCode, ToolEvent, ToolOutput};

const MAX_TITLE_CHARS: usize = 60;

/// Produce a short dialog title from the opening exchange and persist it
/// into dialog metadata.
///
/// Registered as a regular tool (the model may call it), and invoked
/// directly by the chat service after the first assistant turn when the
/// dialog is still untitled.
pub struct GenerateDialogTitleTool {
    provider: Arc<dyn ModelProvider>,
    index: Arc<DialogIndex>,
    store: DialogStore,
}

impl GenerateDialogTitleTool {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        index: Arc<DialogIndex>,
        store: DialogStore,
    ) -> Self {
        Self {
            provider,
            index,
            store,
        }
    }

    /// The direct entry point used by the chat service.
    pub async fn generate(&self, dialog_id: &str) -> anyhow::Result<String> {
        let records = self.store.messages_from(dialog_id, 0)?;
        let mut exchange = String::new();
        for record in records
            .iter()
            .filter(|r| matches!(r.kind, MessageKind::User | MessageKind::Assistant))
            .take(4)
        {
            exchange.push_str(&format!("[{}] {}\n", record.kind.as_str(), record.content));
        }
        if exchange.is_empty() {
            anyhow::bail!("dialog {dialog_id} has no messages to title");
        }

        let req = CompletionRequest {
            messages: vec![
                Message::system(
                    "Produce a short title (at most six words) for this coding \
                     conversation. Respond with the title only — no quotes, no period.",
                ),
                Message::user(exchange),
            ],
            tools: vec![],
            stream: true,
        };
        let mut stream = self.provider.complete(req).await?;
        let mut title = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => title.push_str(&delta),
                ResponseEvent::Done => break,
                _ => {}
            }
        }
        let title = clean_title(&title);
        if title.is_empty() {
            anyhow::bail!("model returned an empty title");
        }

        self.index.update(dialog_id, |d| d.title = Some(title.clone()))?;
        debug!(dialog_id, title = %title, "dialog titled");
        Ok(title)
    }
}

fn clean_title(raw: &str) -> String {
    let mut title = raw.trim().trim_matches('"').trim_end_matches('.').to_string();
    if title.chars().count() > MAX_TITLE_CHARS {
        title = title.chars().take(MAX_TITLE_CHARS).collect::<String>() + "…";
    }
    title
}

#[async_trait]
impl Tool for GenerateDialogTitleTool {
    fn name(&self) -> &str {
        "generate_dialog_title"
    }

    fn description(&self) -> &str {
        "Generates and saves a short title for the current dialog based on\n\
         the conversation so far. Call once the topic is clear."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutput {
        match self.generate(&ctx.dialog_id).await {
            Ok(title) => {
                ctx.emit(ToolEvent::TitleGenerated {
                    title: title.clone(),
                })
                .await;
                ToolOutput::ok(
                    &call.id,
                    json!({"title": title}),
                    format!("Dialog titled: {title}"),
                )
            }
            Err(e) => ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Exception,
                format!("title generation failed: {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use smithy_model::MockProvider;

    fn setup(reply: &str) -> (tempfile::TempDir, GenerateDialogTitleTool, String) {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(DialogIndex::open(&dir.path().join("dialogs")).unwrap());
        let store = DialogStore::open(dir.path().join("dialogs/messages.sqlite")).unwrap();
        let dialog = index.create_dialog().unwrap();
        store
            .append_message(&dialog.id, MessageKind::User, "add a parser", &json!({}))
            .unwrap();
        store
            .append_message(&dialog.id, MessageKind::Assistant, "done", &json!({}))
            .unwrap();
        let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider::text(reply));
        let tool = GenerateDialogTitleTool::new(provider, index, store);
        (dir, tool, dialog.id)
    }

    #[tokio::test]
    async fn generates_and_persists_title() {
        let (_dir, tool, dialog_id) = setup("Add config parser");
        let title = tool.generate(&dialog_id).await.unwrap();
        assert_eq!(title, "Add config parser");
        assert_eq!(
            tool.index.get(&dialog_id).unwrap().title.as_deref(),
            Some("Add config parser")
        );
    }

    #[tokio::test]
    async fn empty_model_reply_is_an_error() {
        let (_dir, tool, dialog_id) = setup("   ");
        assert!(tool.generate(&dialog_id).await.is_err());
        assert!(tool.index.get(&dialog_id).unwrap().title.is_none());
    }

    #[test]
    fn clean_title_strips_quotes_and_truncates() {
        assert_eq!(clean_title("\"Fix tests.\""), "Fix tests");
        let long = "word ".repeat(40);
        assert!(clean_title(&long).chars().count() <= MAX_TITLE_CHARS + 1);
    }
}
