use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::ChunkingConfig;
use crate::error::IndexerError;
use crate::ignore_matcher::IgnoreMatcher;
use crate::scan::{FileInfo, Scanner};

use super::batch::{BatchEmbedder, BatchProgress, FileChunks};
use super::chunker::Chunker;
use super::embedder::Embedder;
use super::store::{Chunk, Document, VectorStore};

/// Outcome of one full or incremental indexing pass, per SPEC_FULL.md §4.8 step 7.
#[derive(Debug, Default)]
pub struct IndexResult {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
    pub files_removed: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
}

/// Orchestrates scan → diff → chunk → embed → store, for both full passes and the
/// watcher's incremental per-event path.
pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    embedder_provider: String,
    embedder_model: String,
    chunker: Chunker,
    max_workers: usize,
    tokens_per_minute: Option<u64>,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        embedder_provider: &str,
        embedder_model: &str,
        chunking: &ChunkingConfig,
        max_workers: usize,
        tokens_per_minute: Option<u64>,
    ) -> Self {
        Self {
            store,
            embedder,
            embedder_provider: embedder_provider.to_string(),
            embedder_model: embedder_model.to_string(),
            chunker: Chunker::from_tokens(chunking.size, chunking.overlap),
            max_workers: max_workers.max(1),
            tokens_per_minute,
        }
    }

    /// Full pass: diff the scan against the store, reindex changed files as one batched
    /// embedding call, then purge documents for files no longer present. `last_index_time`,
    /// when given, lets untouched files skip the store lookup entirely: a file whose mtime
    /// is no newer can't have changed since that run, so only files modified since then
    /// fall through to the hash comparison against the stored document.
    pub async fn index_all(
        &self,
        root: &Path,
        ignore: &IgnoreMatcher,
        cancel: CancellationToken,
        progress: Option<BatchProgress>,
        last_index_time: Option<DateTime<Utc>>,
    ) -> Result<IndexResult, IndexerError> {
        let started = Instant::now();
        self.store.load().await?;

        let scanner = Scanner::new(root, ignore).map_err(|e| IndexerError::InvalidRoot(e.to_string()))?;
        let report = scanner.scan();

        let known: HashSet<String> = self.store.list_documents().await?.into_iter().collect();
        let current: HashSet<String> = report.files.iter().map(|f| f.path.clone()).collect();
        let to_delete: Vec<String> = known.difference(&current).cloned().collect();

        let mut errors = report.skipped;
        let mut queued: Vec<FileInfo> = Vec::new();
        let mut files_skipped = 0usize;

        for file in report.files {
            if let Some(last_index_time) = last_index_time {
                let mod_time = DateTime::<Utc>::from_timestamp(file.mod_time as i64, 0);
                if mod_time.is_some_and(|t| t <= last_index_time) {
                    files_skipped += 1;
                    continue;
                }
            }

            match self.store.get_document(&file.path).await? {
                Some(doc) if doc.hash == file.hash => files_skipped += 1,
                _ => queued.push(file),
            }
        }

        let (files_indexed, chunks_created) = if queued.is_empty() {
            (0, 0)
        } else {
            let (indexed, created, skip_errors) = self.reindex_files(&queued, cancel, progress).await?;
            errors.extend(skip_errors);
            (indexed, created)
        };

        for path in &to_delete {
            self.store.delete_by_file(path).await?;
            self.store.delete_document(path).await?;
        }

        self.store.persist().await?;

        Ok(IndexResult {
            files_indexed,
            files_skipped,
            chunks_created,
            files_removed: to_delete.len(),
            errors,
            duration: started.elapsed(),
        })
    }

    /// Chunks and embeds `files` as a single cross-file batch, then writes each file's
    /// new chunks and document. A file's old chunks are only deleted once its new ones
    /// are ready, so no observer sees a partially updated document.
    async fn reindex_files(
        &self,
        files: &[FileInfo],
        cancel: CancellationToken,
        progress: Option<BatchProgress>,
    ) -> Result<(usize, usize, Vec<String>), IndexerError> {
        self.store.set_embedder_info(&self.embedder_provider, &self.embedder_model).await?;

        let mut file_chunk_infos = Vec::with_capacity(files.len());
        let mut file_chunks_input = Vec::with_capacity(files.len());

        for (file_index, file) in files.iter().enumerate() {
            let chunk_infos = self.chunker.chunk_with_context(&file.path, &file.content);
            file_chunks_input.push(FileChunks {
                file_index,
                chunks: chunk_infos.iter().map(|c| c.content.clone()).collect(),
            });
            file_chunk_infos.push(chunk_infos);
        }

        let batch_embedder = BatchEmbedder::new(self.embedder.clone(), self.max_workers, self.tokens_per_minute);
        let outcome = batch_embedder.embed_batches(file_chunks_input, progress, cancel).await?;

        let mut vectors_by_file: Vec<Vec<Vec<f32>>> = vec![Vec::new(); files.len()];
        for (file_index, vectors) in outcome.vectors {
            vectors_by_file[file_index] = vectors;
        }

        let mut skipped_by_file: std::collections::HashMap<usize, HashSet<usize>> = std::collections::HashMap::new();
        for (file_index, chunk_index) in outcome.skipped {
            skipped_by_file.entry(file_index).or_default().insert(chunk_index);
        }

        let mut chunks_created = 0usize;
        let mut skip_errors = Vec::new();
        for (file_index, (file, (chunk_infos, vectors))) in
            files.iter().zip(file_chunk_infos.into_iter().zip(vectors_by_file)).enumerate()
        {
            self.store.delete_by_file(&file.path).await?;

            let now = Utc::now();
            // Context-length errors drop that chunk's position here and in `vectors`
            // (same order, same skip set), so the zip below still lines up 1:1.
            let kept_infos: Vec<_> = match skipped_by_file.get(&file_index) {
                Some(skip) => chunk_infos
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| !skip.contains(i))
                    .map(|(_, info)| info)
                    .collect(),
                None => chunk_infos,
            };
            if let Some(skip) = skipped_by_file.get(&file_index) {
                skip_errors.push(format!(
                    "{}: skipped {} chunk(s) exceeding the embedding provider's context length",
                    file.path,
                    skip.len()
                ));
            }

            let chunks: Vec<Chunk> = kept_infos
                .into_iter()
                .zip(vectors)
                .map(|(info, vector)| Chunk {
                    id: info.id,
                    file_path: info.file_path,
                    start_line: info.start_line,
                    end_line: info.end_line,
                    content: info.content,
                    vector,
                    hash: info.hash,
                    updated_at: now,
                })
                .collect();

            let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
            chunks_created += chunks.len();
            self.store.save_chunks(chunks).await?;

            self.store
                .save_document(Document {
                    path: file.path.clone(),
                    hash: file.hash.clone(),
                    mod_time: now,
                    chunk_ids,
                })
                .await?;
        }

        Ok((files.len(), chunks_created, skip_errors))
    }

    /// Re-scans one relative path and reconciles it: reindex if still accepted by the
    /// scanner/ignore rules, delete if not. Used by the watcher's Create/Modify path.
    pub async fn index_one(&self, root: &Path, ignore: &IgnoreMatcher, rel_path: &str) -> Result<(), IndexerError> {
        let scanner = Scanner::new(root, ignore).map_err(|e| IndexerError::InvalidRoot(e.to_string()))?;
        match scanner.scan_one(rel_path) {
            Some(file) => {
                let (_, _, skip_errors) = self.reindex_files(&[file], CancellationToken::new(), None).await?;
                for message in skip_errors {
                    log::warn!("{message}");
                }
            }
            None => {
                self.store.delete_by_file(rel_path).await?;
                self.store.delete_document(rel_path).await?;
            }
        }
        self.store.persist().await?;
        Ok(())
    }

    /// Used by the watcher's Delete/Rename-out path.
    pub async fn remove_path(&self, rel_path: &str) -> Result<(), IndexerError> {
        self.store.delete_by_file(rel_path).await?;
        self.store.delete_document(rel_path).await?;
        self.store.persist().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ignore_matcher::IgnoreMatcher;
    use crate::search::store::LocalStore;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::error::EmbedError> {
            Ok(self.embed_batch(&[text.to_string()]).await?.remove(0))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, crate::error::EmbedError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn health_check(&self) -> Result<(), crate::error::EmbedError> {
            Ok(())
        }
    }

    fn build_indexer(dir: &TempDir) -> Indexer {
        let store = Arc::new(LocalStore::new(dir.path().join("index.bin")));
        Indexer::new(
            store,
            Arc::new(StubEmbedder),
            "local-http",
            "stub-model",
            &ChunkingConfig { size: 50, overlap: 5 },
            2,
            None,
        )
    }

    #[tokio::test]
    async fn indexes_new_files_then_skips_them_unchanged() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let ignore = IgnoreMatcher::build(dir.path(), None, &[".git".to_string()]);
        let indexer = build_indexer(&dir);

        let result = indexer.index_all(dir.path(), &ignore, CancellationToken::new(), None, None).await.unwrap();
        assert_eq!(result.files_indexed, 1);
        assert!(result.chunks_created >= 1);

        let result2 = indexer.index_all(dir.path(), &ignore, CancellationToken::new(), None, None).await.unwrap();
        assert_eq!(result2.files_indexed, 0);
        assert_eq!(result2.files_skipped, 1);
    }

    #[tokio::test]
    async fn last_index_time_skips_files_untouched_since_then_without_a_hash_check() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let ignore = IgnoreMatcher::build(dir.path(), None, &[".git".to_string()]);
        let indexer = build_indexer(&dir);

        indexer.index_all(dir.path(), &ignore, CancellationToken::new(), None, None).await.unwrap();

        // Drop the stored document entirely: a hash-only diff would now treat the file
        // as new and reindex it, but a fresh `last_index_time` should short-circuit
        // past that check since the file's mtime hasn't moved since then.
        indexer.store.delete_document("a.rs").await.unwrap();
        let cutoff = Utc::now() + chrono::Duration::seconds(1);

        let result = indexer
            .index_all(dir.path(), &ignore, CancellationToken::new(), None, Some(cutoff))
            .await
            .unwrap();
        assert_eq!(result.files_indexed, 0);
        assert_eq!(result.files_skipped, 1);
    }

    #[tokio::test]
    async fn removes_documents_for_deleted_files() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("gone.rs");
        fs::write(&file_path, "fn gone() {}\n").unwrap();
        let ignore = IgnoreMatcher::build(dir.path(), None, &[".git".to_string()]);
        let indexer = build_indexer(&dir);

        indexer.index_all(dir.path(), &ignore, CancellationToken::new(), None, None).await.unwrap();
        fs::remove_file(&file_path).unwrap();

        let result = indexer.index_all(dir.path(), &ignore, CancellationToken::new(), None, None).await.unwrap();
        assert_eq!(result.files_removed, 1);
    }

    #[tokio::test]
    async fn index_one_reindexes_a_single_changed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b.rs");
        fs::write(&path, "fn b() {}\n").unwrap();
        let ignore = IgnoreMatcher::build(dir.path(), None, &[".git".to_string()]);
        let indexer = build_indexer(&dir);

        indexer.index_all(dir.path(), &ignore, CancellationToken::new(), None, None).await.unwrap();
        fs::write(&path, "fn b() { changed() }\n").unwrap();
        indexer.index_one(dir.path(), &ignore, "b.rs").await.unwrap();

        let chunks = indexer.store.get_chunks_for_file("b.rs").await.unwrap();
        assert!(chunks[0].content.contains("changed"));
    }
}
