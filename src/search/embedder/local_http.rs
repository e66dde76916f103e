use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{parse_retry_after, Embedder};
use crate::error::EmbedError;

/// Single-prompt local HTTP embedder, shaped after an Ollama-style `/api/embed`
/// endpoint. No native batch support: `embed_batch` issues one request per input.
pub struct LocalHttpEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    client: Client,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

impl LocalHttpEmbedder {
    pub fn new(endpoint: &str, model: &str, dimensions: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");

        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimensions,
            client,
        }
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.endpoint))
            .json(&EmbedRequest {
                model: self.model.clone(),
                prompt: text.to_string(),
            })
            .send()
            .await
            .map_err(|source| EmbedError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| EmbedError::Decode {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        Ok(parsed.embedding)
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
impl Embedder for LocalHttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_one(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<(), EmbedError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .await
            .map_err(|source| EmbedError::Transport {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let tags: TagsResponse = response.json().await.map_err(|e| EmbedError::Decode {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        })?;

        let available = tags
            .models
            .iter()
            .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model)));

        if !available {
            return Err(EmbedError::Decode {
                endpoint: self.endpoint.clone(),
                reason: format!("model '{}' not installed", self.model),
            });
        }
        Ok(())
    }
}
