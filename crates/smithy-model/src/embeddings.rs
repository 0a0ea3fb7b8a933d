// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context};
use serde_json::{json, Value};
use tracing::debug;

/// Client for the OpenAI-compatible `/embeddings` endpoint.
///
/// Used by the RAG index.  Construction does not validate the key; when the
/// project has no API key configured the index runs in hash-tracking mode
/// and never constructs this client.
pub struct EmbeddingsClient {
    model: String,
    api_key: String,
    url: String,
    client: reqwest::Client,
}

impl EmbeddingsClient {
    pub fn new(model: String, api_key: String, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model,
            api_key,
            url: format!("{base}/embeddings"),
            client: reqwest::Client::new(),
        }
    }

    /// Embed a batch of texts; one vector per input, in input order.
    pub async fn embed(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = inputs.len(), model = %self.model, "embedding batch");

        let body = json!({
            "model": self.model,
            "input": inputs,
        });
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("embeddings request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("embeddings error {status}: {text}");
        }

        let v: Value = resp.json().await.context("decoding embeddings response")?;
        let data = v["data"]
            .as_array()
            .context("embeddings response missing data array")?;

        let mut out = Vec::with_capacity(data.len());
        for item in data {
            let vec: Vec<f32> = item["embedding"]
                .as_array()
                .context("embedding item missing vector")?
                .iter()
                .filter_map(|x| x.as_f64().map(|f| f as f32))
                .collect();
            out.push(vec);
        }
        if out.len() != inputs.len() {
            bail!(
                "embeddings response returned {} vectors for {} inputs",
                out.len(),
                inputs.len()
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_derived_from_base() {
        let c = EmbeddingsClient::new(
            "text-embedding-3-small".into(),
            "sk-test".into(),
            "https://api.openai.com/v1/",
        );
        assert_eq!(c.url, "https://api.openai.com/v1/embeddings");
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let c = EmbeddingsClient::new("m".into(), "k".into(), "http://localhost:1/v1");
        let out = c.embed(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
