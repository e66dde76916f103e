use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{parse_retry_after, Embedder};
use crate::error::EmbedError;

/// Substrings an OpenAI-shaped 400 body uses to report an oversized input, per
/// SPEC_FULL.md §6.
const CONTEXT_LENGTH_MARKERS: [&str; 3] = ["maximum context length", "too many tokens", "reduce the length"];
/// Conservative fallback when the 400 body doesn't carry a parseable token count.
const DEFAULT_MAX_CONTEXT_TOKENS: usize = 8191;

fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

fn is_context_length_body(body: &str) -> bool {
    let lowered = body.to_lowercase();
    CONTEXT_LENGTH_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// OpenAI-shaped batched embeddings endpoint. `api_key` is optional so the same wire
/// format serves both cloud providers and LM Studio-like local servers with no auth.
pub struct CloudApiEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    client: Client,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
    index: usize,
}

impl CloudApiEmbedder {
    pub fn new(endpoint: &str, model: &str, dimensions: usize, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");

        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
            api_key,
            client,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(format!("{}{}", self.endpoint, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn status_error(&self, response: reqwest::Response) -> EmbedError {
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return EmbedError::Auth {
                endpoint: self.endpoint.clone(),
            };
        }
        if status.as_u16() == 429 {
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );
            return EmbedError::RateLimit {
                endpoint: self.endpoint.clone(),
                retry_after,
            };
        }
        EmbedError::Server {
            endpoint: self.endpoint.clone(),
            status: status.as_u16(),
        }
    }
}

#[async_trait]
impl Embedder for CloudApiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results.pop().ok_or_else(|| EmbedError::Decode {
            endpoint: self.endpoint.clone(),
            reason: "empty response for single-input request".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .request("/embeddings")
            .json(&EmbedRequest {
                model: self.model.clone(),
                input: texts.to_vec(),
                dimensions: Some(self.dimensions),
            })
            .send()
            .await
            .map_err(|source| EmbedError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        if response.status().as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            if is_context_length_body(&body) {
                let (chunk_index, estimated_tokens) = texts
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (i, estimate_tokens(t)))
                    .max_by_key(|(_, tokens)| *tokens)
                    .unwrap_or((0, 0));
                return Err(EmbedError::ContextLength {
                    chunk_index,
                    estimated_tokens,
                    max_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
                });
            }
            return Err(EmbedError::Server {
                endpoint: self.endpoint.clone(),
                status: 400,
            });
        }

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| EmbedError::Decode {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        if parsed.data.len() != texts.len() {
            return Err(EmbedError::ShapeMismatch {
                expected: texts.len(),
                actual: parsed.data.len(),
            });
        }

        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        for datum in parsed.data {
            if datum.index >= ordered.len() {
                return Err(EmbedError::ShapeMismatch {
                    expected: texts.len(),
                    actual: datum.index + 1,
                });
            }
            ordered[datum.index] = Some(datum.embedding);
        }

        ordered
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| EmbedError::Decode {
                    endpoint: self.endpoint.clone(),
                    reason: format!("missing embedding for input {i}"),
                })
            })
            .collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<(), EmbedError> {
        let builder = self.client.get(format!("{}/models", self.endpoint));
        let builder = match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        };

        let response = builder.send().await.map_err(|source| EmbedError::Transport {
            endpoint: self.endpoint.clone(),
            source,
        })?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_client_sends_no_bearer_header() {
        let embedder = CloudApiEmbedder::new("http://localhost:1234/v1", "model", 4, None);
        let req = embedder.request("/embeddings").build().unwrap();
        assert!(req.headers().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn authenticated_client_sends_bearer_header() {
        let embedder = CloudApiEmbedder::new(
            "https://api.example.com/v1",
            "model",
            4,
            Some("secret".to_string()),
        );
        let req = embedder.request("/embeddings").build().unwrap();
        assert!(req.headers().get(reqwest::header::AUTHORIZATION).is_some());
    }

    #[test]
    fn recognizes_openai_style_context_length_message() {
        let body = r#"{"error":{"message":"This model's maximum context length is 8191 tokens.","type":"invalid_request_error"}}"#;
        assert!(is_context_length_body(body));
    }

    #[test]
    fn ignores_unrelated_400_bodies() {
        let body = r#"{"error":{"message":"Invalid model name","type":"invalid_request_error"}}"#;
        assert!(!is_context_length_body(body));
    }
}
