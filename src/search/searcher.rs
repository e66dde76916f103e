use anyhow::Result;
use std::sync::Arc;

use crate::config::{BoostRule, HybridConfig};

use super::embedder::Embedder;
use super::hybrid::{reciprocal_rank_fusion, text_search};
use super::store::{SearchResult, VectorStore};

/// Query-time path: embed → vector search → boost → optional lexical fusion, per
/// SPEC_FULL.md §4.10.
pub struct Searcher {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    boost: Vec<BoostRule>,
    hybrid: HybridConfig,
}

impl Searcher {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, boost: Vec<BoostRule>, hybrid: HybridConfig) -> Self {
        Self {
            store,
            embedder,
            boost,
            hybrid,
        }
    }

    /// Vector similarity plus path boosts, no lexical fusion.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.store.load().await?;

        let query_vector = self.embedder.embed(query).await?;
        let boost_pool = limit.saturating_mul(3).max(limit);
        let mut results = self.store.search(&query_vector, boost_pool).await?;

        self.apply_boosts(&mut results);
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    /// Vector search fused with a lexical ranking via reciprocal rank fusion.
    pub async fn search_hybrid(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.store.load().await?;

        let query_vector = self.embedder.embed(query).await?;
        let boost_pool = limit.saturating_mul(3).max(limit);
        let mut vector_results = self.store.search(&query_vector, boost_pool).await?;
        self.apply_boosts(&mut vector_results);

        if !self.hybrid.enabled {
            vector_results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            vector_results.truncate(limit);
            return Ok(vector_results);
        }

        let all_chunks = self.store.get_all_chunks().await?;
        let text_results = text_search(&all_chunks, query, limit * 2);

        Ok(reciprocal_rank_fusion(self.hybrid.k, limit, vec![vector_results, text_results]))
    }

    /// Dispatches to `search_hybrid` or `search` according to configuration.
    pub async fn smart_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if self.hybrid.enabled {
            self.search_hybrid(query, limit).await
        } else {
            self.search(query, limit).await
        }
    }

    /// Applies the first matching boost rule (in configured order) to each result's
    /// score; no match leaves the score at multiplier 1.
    fn apply_boosts(&self, results: &mut [SearchResult]) {
        for result in results.iter_mut() {
            if let Some(rule) = self.boost.iter().find(|r| result.chunk.file_path.contains(&r.path_contains)) {
                result.score *= rule.multiplier;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::store::Chunk;
    use chrono::Utc;

    fn make_result(file_path: &str, score: f32) -> SearchResult {
        SearchResult::new(
            Chunk {
                id: file_path.to_string(),
                file_path: file_path.to_string(),
                start_line: 1,
                end_line: 2,
                content: "body".to_string(),
                vector: vec![],
                hash: "h".to_string(),
                updated_at: Utc::now(),
            },
            score,
        )
    }

    #[test]
    fn first_matching_boost_rule_wins() {
        let searcher = Searcher {
            store: Arc::new(crate::search::store::LocalStore::new(std::path::PathBuf::from("/tmp/unused.bin"))),
            embedder: Arc::new(NoopEmbedder),
            boost: vec![
                BoostRule {
                    path_contains: "test".to_string(),
                    multiplier: 0.5,
                },
                BoostRule {
                    path_contains: "src/".to_string(),
                    multiplier: 1.2,
                },
            ],
            hybrid: HybridConfig::default(),
        };

        let mut results = vec![make_result("src/test/a.rs", 1.0), make_result("src/lib.rs", 1.0)];
        searcher.apply_boosts(&mut results);

        assert_eq!(results[0].score, 0.5);
        assert_eq!(results[1].score, 1.2);
    }

    struct NoopEmbedder;

    #[async_trait::async_trait]
    impl Embedder for NoopEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, crate::error::EmbedError> {
            Ok(vec![])
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, crate::error::EmbedError> {
            Ok(vec![])
        }
        fn dimensions(&self) -> usize {
            0
        }
        async fn health_check(&self) -> Result<(), crate::error::EmbedError> {
            Ok(())
        }
    }
}
