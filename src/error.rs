use thiserror::Error;

/// Errors surfaced by an [`crate::search::embedder::Embedder`] implementation.
///
/// One `embed_batch` call maps to exactly one taxonomy member; retry policy lives in
/// [`crate::search::batch::BatchEmbedder`], not here.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("transport error contacting {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("authentication failed for {endpoint}")]
    Auth { endpoint: String },

    #[error("rate limited by {endpoint}{}", retry_after.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimit {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("server error from {endpoint}: status {status}")]
    Server { endpoint: String, status: u16 },

    #[error("context length exceeded at chunk {chunk_index}: estimated {estimated_tokens} tokens, max {max_tokens}")]
    ContextLength {
        chunk_index: usize,
        estimated_tokens: usize,
        max_tokens: usize,
    },

    #[error("failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("shape mismatch: expected {expected} vectors, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

impl EmbedError {
    /// Whether [`crate::search::batch::BatchEmbedder`] should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::RateLimit { .. } | EmbedError::Server { .. })
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EmbedError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors from a [`crate::search::store::VectorStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

/// Errors raised orchestrating a scan/chunk/embed/store pass.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error("project root does not exist: {0}")]
    InvalidRoot(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch {batch_index} failed: {cause}")]
    BatchFailed { batch_index: usize, cause: String },
}

/// Errors constructing the core from a [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown embedder provider: {0}")]
    UnknownProvider(String),

    #[error("unknown store backend: {0}")]
    UnknownBackend(String),

    #[error("missing API key for provider {0}")]
    MissingApiKey(String),

    #[error("cannot reach embedding endpoint {endpoint}: {reason}")]
    Connectivity { endpoint: String, reason: String },

    #[error("daemon already running with pid {0}")]
    AlreadyRunning(u32),
}

/// Errors from the filesystem watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: String,
        #[source]
        source: notify::Error,
    },
}

pub type Result<T, E> = std::result::Result<T, E>;
