mod local;
mod types;

pub use local::LocalStore;
pub use types::{Chunk, Document, FileStats, IndexStats, SearchResult};

use crate::error::StoreError;
use async_trait::async_trait;

/// Persist/query chunks, documents, and statistics for one project index.
///
/// `delete_by_file` + deleting the document form an atomic removal from the caller's
/// point of view (SPEC_FULL.md §4.6); callers that want to replace a file's chunks must
/// call `delete_by_file` before `save_chunks`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<(), StoreError>;
    async fn delete_by_file(&self, file_path: &str) -> Result<(), StoreError>;
    async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<SearchResult>, StoreError>;
    async fn get_document(&self, file_path: &str) -> Result<Option<Document>, StoreError>;
    async fn save_document(&self, doc: Document) -> Result<(), StoreError>;
    async fn delete_document(&self, file_path: &str) -> Result<(), StoreError>;
    async fn list_documents(&self) -> Result<Vec<String>, StoreError>;
    async fn get_chunks_for_file(&self, file_path: &str) -> Result<Vec<Chunk>, StoreError>;
    async fn get_all_chunks(&self) -> Result<Vec<Chunk>, StoreError>;
    async fn get_stats(&self) -> Result<IndexStats, StoreError>;
    async fn set_embedder_info(&self, provider: &str, model: &str) -> Result<(), StoreError>;
    async fn list_files_with_stats(&self) -> Result<Vec<FileStats>, StoreError>;
    async fn load(&self) -> Result<(), StoreError>;
    async fn persist(&self) -> Result<(), StoreError>;
    async fn close(&self) -> Result<(), StoreError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - (-1.0)).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_empty() {
        let a: Vec<f32> = vec![];
        let b: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
