// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolErrorCode, ToolOutput};
use crate::ToolContext;

const DEFAULT_MAX_CHARS: usize = 50_000;

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and convert the content to readable text.\n\
         HTML is converted to plain text, JSON is pretty-printed, other\n\
         text content is returned as-is. http/https only; content is\n\
         limited to 50,000 characters (configurable via max_chars).\n\
         JS-rendered pages may come back mostly empty — the extraction\n\
         note in the result says how much text survived."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 50000)"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolOutput {
        let url = match call.args.get("url").and_then(|v| v.as_str()) {
            Some(u) => u.to_string(),
            None => {
                return ToolOutput::error(
                    &call.id,
                    self.name(),
                    ToolErrorCode::Validation,
                    "missing required parameter 'url'",
                )
            }
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::Validation,
                format!("not an http(s) URL: {url}"),
            );
        }
        let max_chars = call
            .args
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_CHARS as u64) as usize;

        debug!(url = %url, "web_fetch tool");

        match fetch_url(&url, max_chars).await {
            Ok((content, content_type, truncated)) => {
                let chars = content.len();
                ToolOutput::ok(
                    &call.id,
                    json!({
                        "url": url,
                        "content": content,
                        "content_type": content_type,
                        "truncated": truncated,
                    }),
                    format!("Fetched {url} ({chars} chars)"),
                )
            }
            Err(e) => ToolOutput::error(
                &call.id,
                self.name(),
                ToolErrorCode::ExecFailed,
                format!("fetch error: {e}"),
            ),
        }
    }
}

async fn fetch_url(url: &str, max_chars: usize) -> anyhow::Result<(String, String, bool)> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent("agentsmithy/0.3")
        .build()?;

    let response = client.get(url).send().await?;
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let body = response.text().await?;

    let content = if content_type.contains("html") {
        html_to_text(&body)
    } else if content_type.contains("json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(v) => serde_json::to_string_pretty(&v).unwrap_or(body),
            Err(_) => body,
        }
    } else {
        body
    };

    if content.len() > max_chars {
        let mut cut = max_chars;
        while cut > 0 && !content.is_char_boundary(cut) {
            cut -= 1;
        }
        Ok((content[..cut].to_string(), content_type, true))
    } else {
        Ok((content, content_type, false))
    }
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::context::test_support::context_for;

    #[test]
    fn html_to_text_strips_tags() {
        let html = "<html><body><h1>Hello</h1><p>World</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("<h1>"));
    }

    #[tokio::test]
    async fn non_http_url_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = WebFetchTool
            .execute(
                &ToolCall {
                    id: "1".into(),
                    name: "web_fetch".into(),
                    args: json!({"url": "file:///etc/passwd"}),
                },
                &ctx,
            )
            .await;
        assert_eq!(out.error_code(), Some("validation"));
    }

    #[tokio::test]
    async fn missing_url_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx, _cancel) = context_for(dir.path());
        let out = WebFetchTool
            .execute(
                &ToolCall {
                    id: "1".into(),
                    name: "web_fetch".into(),
                    args: json!({}),
                },
                &ctx,
            )
            .await;
        assert_eq!(out.error_code(), Some("validation"));
    }
}
