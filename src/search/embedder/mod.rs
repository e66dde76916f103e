mod cloud_api;
mod local_http;

pub use cloud_api::CloudApiEmbedder;
pub use local_http::LocalHttpEmbedder;

use crate::config::{EmbedderConfig, EmbedderProvider};
use crate::error::EmbedError;
use async_trait::async_trait;

/// Converts text to vectors. Implementations own their own HTTP transport; batching,
/// rate limiting and retry live one layer up in `crate::search::batch::BatchEmbedder`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
    fn dimensions(&self) -> usize;
    async fn health_check(&self) -> Result<(), EmbedError>;
}

/// Builds the concrete `Embedder` named by `config.provider`. `LmStudioLike` reuses the
/// cloud-API wire shape with authentication disabled, per SPEC_FULL.md §4.4.
pub fn create_embedder(config: &EmbedderConfig) -> Box<dyn Embedder> {
    match config.provider {
        EmbedderProvider::LocalHttp => Box::new(LocalHttpEmbedder::new(
            &config.endpoint,
            &config.model,
            config.dimensions,
        )),
        EmbedderProvider::CloudApi => Box::new(CloudApiEmbedder::new(
            &config.endpoint,
            &config.model,
            config.dimensions,
            config.api_key.clone(),
        )),
        EmbedderProvider::LmStudioLike => Box::new(CloudApiEmbedder::new(
            &config.endpoint,
            &config.model,
            config.dimensions,
            None,
        )),
    }
}

/// Parses a `Retry-After` header value, which per RFC 9110 is either a delta-seconds
/// integer or an HTTP-date.
pub(crate) fn parse_retry_after(raw: Option<&str>) -> Option<u64> {
    let raw = raw?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let target = httpdate::parse_http_date(raw).ok()?;
    let now = std::time::SystemTime::now();
    target.duration_since(now).ok().map(|d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_retry_after_accepts_delta_seconds() {
        assert_eq!(parse_retry_after(Some("30")), Some(30));
    }

    #[test]
    fn parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after(Some("not-a-date")), None);
    }

    #[test]
    fn parse_retry_after_handles_missing_header() {
        assert_eq!(parse_retry_after(None), None);
    }
}
