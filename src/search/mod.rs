pub mod batch;
pub mod chunker;
pub mod embedder;
pub mod hybrid;
pub mod indexer;
pub mod searcher;
pub mod store;
pub mod watcher;

pub use batch::{BatchEmbedder, FileChunks};
pub use chunker::{ChunkInfo, Chunker};
pub use embedder::{create_embedder, Embedder};
pub use hybrid::{reciprocal_rank_fusion, text_search};
pub use indexer::{IndexResult, Indexer};
pub use searcher::Searcher;
pub use store::{Chunk, Document, FileStats, IndexStats, LocalStore, SearchResult, VectorStore};
pub use watcher::{FileEvent, FileEventKind, Watcher};
