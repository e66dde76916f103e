use super::{cosine_similarity, Chunk, Document, FileStats, IndexStats, SearchResult};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreData {
    version: u32,
    documents: HashMap<String, Document>,
    chunks: HashMap<String, Chunk>,
    updated_at: chrono::DateTime<Utc>,
    #[serde(default)]
    embedder_provider: Option<String>,
    #[serde(default)]
    embedder_model: Option<String>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            documents: HashMap::new(),
            chunks: HashMap::new(),
            updated_at: Utc::now(),
            embedder_provider: None,
            embedder_model: None,
        }
    }
}

/// Single-file binary-serialized [`VectorStore`](super::VectorStore) backend, per
/// SPEC_FULL.md §4.7. One read-write lock guards the in-memory maps; `persist` writes a
/// temp file in the same directory and renames it over the target.
pub struct LocalStore {
    path: PathBuf,
    data: RwLock<StoreData>,
}

impl LocalStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            data: RwLock::new(StoreData::default()),
        }
    }

    fn read_lock(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreData>, StoreError> {
        self.data.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreData>, StoreError> {
        self.data.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn atomic_write(&self, data: &StoreData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("bin.tmp");
        let encoded = bincode::serialize(data)
            .map_err(|e| StoreError::Corrupt { path: self.path.display().to_string(), reason: e.to_string() })?;
        fs::write(&temp_path, encoded)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// Min score-id pair for the top-k heap; ties broken by stable chunk id order.
struct ScoredResult(SearchResult);

impl Eq for ScoredResult {}
impl PartialEq for ScoredResult {
    fn eq(&self, other: &Self) -> bool {
        self.0.score == other.0.score && self.0.chunk.id == other.0.chunk.id
    }
}
impl PartialOrd for ScoredResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredResult {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .partial_cmp(&other.0.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.0.chunk.id.cmp(&self.0.chunk.id))
    }
}

#[async_trait]
impl super::VectorStore for LocalStore {
    async fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<(), StoreError> {
        let mut data = self.write_lock()?;
        for chunk in chunks {
            data.chunks.insert(chunk.id.clone(), chunk);
        }
        data.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<(), StoreError> {
        let mut data = self.write_lock()?;
        let ids: Vec<String> = data
            .chunks
            .iter()
            .filter(|(_, c)| c.file_path == file_path)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            data.chunks.remove(&id);
        }
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<SearchResult>, StoreError> {
        let data = self.read_lock()?;

        // Bounded min-heap: keep only the best `limit` seen so far (§4.7 rationale:
        // total chunk counts may reach the tens of thousands, k stays small).
        let mut heap: BinaryHeap<std::cmp::Reverse<ScoredResult>> = BinaryHeap::with_capacity(limit + 1);

        for chunk in data.chunks.values() {
            let score = cosine_similarity(query_vector, &chunk.vector);
            let candidate = ScoredResult(SearchResult::new(chunk.clone(), score));
            if limit == 0 {
                continue;
            }
            if heap.len() < limit {
                heap.push(std::cmp::Reverse(candidate));
            } else if let Some(std::cmp::Reverse(worst)) = heap.peek() {
                if candidate.cmp(worst) == Ordering::Greater {
                    heap.pop();
                    heap.push(std::cmp::Reverse(candidate));
                }
            }
        }

        let mut results: Vec<SearchResult> = heap.into_iter().map(|std::cmp::Reverse(r)| r.0).collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        Ok(results)
    }

    async fn get_document(&self, file_path: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.read_lock()?.documents.get(file_path).cloned())
    }

    async fn save_document(&self, doc: Document) -> Result<(), StoreError> {
        let mut data = self.write_lock()?;
        data.documents.insert(doc.path.clone(), doc);
        data.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_document(&self, file_path: &str) -> Result<(), StoreError> {
        let mut data = self.write_lock()?;
        data.documents.remove(file_path);
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read_lock()?.documents.keys().cloned().collect())
    }

    async fn get_chunks_for_file(&self, file_path: &str) -> Result<Vec<Chunk>, StoreError> {
        Ok(self
            .read_lock()?
            .chunks
            .values()
            .filter(|c| c.file_path == file_path)
            .cloned()
            .collect())
    }

    async fn get_all_chunks(&self) -> Result<Vec<Chunk>, StoreError> {
        Ok(self.read_lock()?.chunks.values().cloned().collect())
    }

    async fn get_stats(&self) -> Result<IndexStats, StoreError> {
        let data = self.read_lock()?;
        let index_size = if self.path.exists() {
            fs::metadata(&self.path)?.len()
        } else {
            0
        };
        Ok(IndexStats {
            total_files: data.documents.len(),
            total_chunks: data.chunks.len(),
            index_size_bytes: index_size,
            last_updated: Some(data.updated_at),
            embedder_provider: data.embedder_provider.clone(),
            embedder_model: data.embedder_model.clone(),
        })
    }

    async fn set_embedder_info(&self, provider: &str, model: &str) -> Result<(), StoreError> {
        let mut data = self.write_lock()?;
        data.embedder_provider = Some(provider.to_string());
        data.embedder_model = Some(model.to_string());
        Ok(())
    }

    async fn list_files_with_stats(&self) -> Result<Vec<FileStats>, StoreError> {
        let data = self.read_lock()?;
        Ok(data
            .documents
            .values()
            .map(|doc| FileStats {
                path: doc.path.clone(),
                chunk_count: doc.chunk_ids.len(),
                hash: doc.hash.clone(),
                mod_time: doc.mod_time,
            })
            .collect())
    }

    async fn load(&self) -> Result<(), StoreError> {
        if !self.path.exists() {
            return Ok(());
        }
        let bytes = fs::read(&self.path)?;
        let loaded: StoreData = bincode::deserialize(&bytes).map_err(|e| StoreError::Corrupt {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut data = self.write_lock()?;
        *data = loaded;
        Ok(())
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let data = self.read_lock()?;
        self.atomic_write(&data)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::super::VectorStore;
    use super::*;
    use tempfile::TempDir;

    fn make_chunk(id: &str, file: &str, vector: Vec<f32>) -> Chunk {
        Chunk {
            id: id.to_string(),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 2,
            content: "body".to_string(),
            vector,
            hash: "h".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn persist_then_load_reproduces_documents_and_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");

        let store = LocalStore::new(path.clone());
        store
            .save_chunks(vec![make_chunk("a.rs_0", "a.rs", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .save_document(Document {
                path: "a.rs".to_string(),
                hash: "x".to_string(),
                mod_time: Utc::now(),
                chunk_ids: vec!["a.rs_0".to_string()],
            })
            .await
            .unwrap();
        store.persist().await.unwrap();

        let reloaded = LocalStore::new(path);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.list_documents().await.unwrap(), vec!["a.rs".to_string()]);
        assert_eq!(reloaded.get_all_chunks().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_by_file_removes_its_chunks_only() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("index.bin"));
        store
            .save_chunks(vec![
                make_chunk("a.rs_0", "a.rs", vec![1.0, 0.0]),
                make_chunk("b.rs_0", "b.rs", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        store.delete_by_file("a.rs").await.unwrap();

        let remaining = store.get_all_chunks().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].file_path, "b.rs");
    }

    #[tokio::test]
    async fn list_files_with_stats_reflects_saved_documents() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("index.bin"));
        store
            .save_document(Document {
                path: "a.rs".to_string(),
                hash: "x".to_string(),
                mod_time: Utc::now(),
                chunk_ids: vec!["a.rs_0".to_string(), "a.rs_1".to_string()],
            })
            .await
            .unwrap();

        let stats = store.list_files_with_stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].path, "a.rs");
        assert_eq!(stats[0].chunk_count, 2);
    }

    #[tokio::test]
    async fn set_embedder_info_is_reflected_in_stats() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("index.bin"));

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.embedder_provider, None);
        assert_eq!(stats.embedder_model, None);

        store.set_embedder_info("local-http", "nomic-embed-text").await.unwrap();
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.embedder_provider.as_deref(), Some("local-http"));
        assert_eq!(stats.embedder_model.as_deref(), Some("nomic-embed-text"));
    }

    #[tokio::test]
    async fn search_returns_descending_scores_bounded_by_limit() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("index.bin"));
        store
            .save_chunks(vec![
                make_chunk("a", "a.rs", vec![1.0, 0.0]),
                make_chunk("b", "b.rs", vec![0.9, 0.1]),
                make_chunk("c", "c.rs", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert_eq!(results[0].chunk.id, "a");
    }
}
