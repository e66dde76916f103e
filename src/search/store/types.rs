use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous slice of one file's text, plus its embedding and positional metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// `"<relpath>_<chunkIndex>"`, unique within a store.
    pub id: String,
    pub file_path: String,
    /// 1-indexed, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    /// Raw text, possibly prefixed with `"File: <path>\n\n"` by the chunker.
    pub content: String,
    pub vector: Vec<f32>,
    /// Short content-derived hash, compared only for equality between runs.
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

/// The indexed representation of one source file; owns its chunks by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    /// SHA-256 hex of the file's bytes.
    pub hash: String,
    pub mod_time: DateTime<Utc>,
    pub chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub score: f32,
}

impl SearchResult {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score }
    }
}

/// Per-file summary used by status reporting; cheaper than fetching every chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStats {
    pub path: String,
    pub chunk_count: usize,
    pub hash: String,
    pub mod_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub index_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub embedder_provider: Option<String>,
    pub embedder_model: Option<String>,
}
