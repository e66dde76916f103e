use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::embedder::Embedder;
use crate::error::{EmbedError, IndexerError};

/// Per-request input cap, per SPEC_FULL.md §4.5.
pub const MAX_INPUTS_PER_BATCH: usize = 2000;
/// Per-request token cap, estimated as `ceil(len/4)` per input.
pub const MAX_TOKENS_PER_BATCH: usize = 280_000;

const REDUCTION_THRESHOLD: u32 = 3;
const RESTORATION_THRESHOLD: u32 = 10;

const RETRY_BASE_DELAY_SECS: f64 = 1.0;
const RETRY_MULTIPLIER: f64 = 2.0;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(32);
const RETRY_MAX_ATTEMPTS: u32 = 5;
const RETRY_AFTER_CAP: Duration = Duration::from_secs(60);

/// One file's queued chunk texts, keyed by a caller-assigned index.
pub struct FileChunks {
    pub file_index: usize,
    pub chunks: Vec<String>,
}

struct BatchEntry {
    file_index: usize,
    chunk_index: usize,
    content: String,
}

struct Batch {
    index: usize,
    entries: Vec<BatchEntry>,
}

fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// Greedily fills batches in file/chunk order, respecting the input and token caps. A
/// single chunk whose own token estimate exceeds the cap is placed alone in its batch.
fn form_batches(files: &[FileChunks]) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<BatchEntry> = Vec::new();
    let mut current_tokens = 0usize;

    for file in files {
        for (chunk_index, content) in file.chunks.iter().enumerate() {
            let tokens = estimate_tokens(content);
            let entry = BatchEntry {
                file_index: file.file_index,
                chunk_index,
                content: content.clone(),
            };

            if tokens > MAX_TOKENS_PER_BATCH {
                if !current.is_empty() {
                    batches.push(Batch {
                        index: batches.len(),
                        entries: std::mem::take(&mut current),
                    });
                    current_tokens = 0;
                }
                batches.push(Batch {
                    index: batches.len(),
                    entries: vec![entry],
                });
                continue;
            }

            let would_exceed = !current.is_empty()
                && (current.len() + 1 > MAX_INPUTS_PER_BATCH || current_tokens + tokens > MAX_TOKENS_PER_BATCH);
            if would_exceed {
                batches.push(Batch {
                    index: batches.len(),
                    entries: std::mem::take(&mut current),
                });
                current_tokens = 0;
            }

            current_tokens += tokens;
            current.push(entry);
        }
    }

    if !current.is_empty() {
        batches.push(Batch {
            index: batches.len(),
            entries: current,
        });
    }

    batches
}

/// Shrinks and grows the batch worker pool in response to observed rate limiting, per
/// SPEC_FULL.md §4.5. Both counters are monotonic between adjustments.
pub struct AdaptiveRateLimiter {
    current_workers: AtomicUsize,
    max_workers: usize,
    consecutive_429: AtomicU32,
    consecutive_success: AtomicU32,
}

impl AdaptiveRateLimiter {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            current_workers: AtomicUsize::new(max_workers),
            max_workers,
            consecutive_429: AtomicU32::new(0),
            consecutive_success: AtomicU32::new(0),
        }
    }

    pub fn current_workers(&self) -> usize {
        self.current_workers.load(Ordering::SeqCst)
    }

    pub fn on_rate_limit_hit(&self) {
        self.consecutive_success.store(0, Ordering::SeqCst);
        let hits = self.consecutive_429.fetch_add(1, Ordering::SeqCst) + 1;
        if hits >= REDUCTION_THRESHOLD {
            let mut reduced_to = self.current_workers();
            let _ = self.current_workers.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
                reduced_to = (w / 2).max(1);
                Some(reduced_to)
            });
            self.consecutive_429.store(0, Ordering::SeqCst);
            log::warn!("reducing embedder worker pool to {reduced_to} after repeated rate limiting");
        }
    }

    pub fn on_success(&self) {
        self.consecutive_429.store(0, Ordering::SeqCst);
        let successes = self.consecutive_success.fetch_add(1, Ordering::SeqCst) + 1;
        if successes >= RESTORATION_THRESHOLD {
            let max = self.max_workers;
            let _ = self
                .current_workers
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| Some((w + 1).min(max)));
            self.consecutive_success.store(0, Ordering::SeqCst);
        }
    }
}

/// 1-minute sliding-window token-per-minute gate.
pub struct TokenBucket {
    capacity: u64,
    usage: Mutex<VecDeque<(Instant, u64)>>,
}

impl TokenBucket {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            usage: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until `tokens` would fit under the trailing 60s window, then records them.
    pub async fn acquire(&self, tokens: u64) {
        if self.capacity == 0 {
            return;
        }
        loop {
            let wait = {
                let mut usage = self.usage.lock().expect("token bucket lock poisoned");
                let now = Instant::now();
                while let Some(&(t, _)) = usage.front() {
                    if now.duration_since(t) >= Duration::from_secs(60) {
                        usage.pop_front();
                    } else {
                        break;
                    }
                }
                let used: u64 = usage.iter().map(|(_, n)| n).sum();
                if used + tokens <= self.capacity {
                    usage.push_back((now, tokens));
                    None
                } else {
                    let oldest = usage.front().map(|(t, _)| *t).unwrap_or(now);
                    Some(Duration::from_secs(60).saturating_sub(now.duration_since(oldest)))
                }
            };
            match wait {
                None => return,
                Some(delay) => sleep(delay.max(Duration::from_millis(20))).await,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchProgressEvent {
    pub batch_index: usize,
    pub total_batches: usize,
    pub completed_chunks: usize,
    pub total_chunks: usize,
    pub retrying: bool,
    pub attempt: u32,
    pub status: u16,
}

pub type BatchProgress = Arc<dyn Fn(BatchProgressEvent) + Send + Sync>;

/// Converts queued per-file chunk texts into per-file embeddings with bounded
/// concurrency, adaptive worker sizing, token-per-minute pacing, and per-batch retry.
pub struct BatchEmbedder {
    embedder: Arc<dyn Embedder>,
    limiter: Arc<AdaptiveRateLimiter>,
    bucket: Option<Arc<TokenBucket>>,
}

impl BatchEmbedder {
    pub fn new(embedder: Arc<dyn Embedder>, max_workers: usize, tokens_per_minute: Option<u64>) -> Self {
        Self {
            embedder,
            limiter: Arc::new(AdaptiveRateLimiter::new(max_workers)),
            bucket: tokens_per_minute.map(|tpm| Arc::new(TokenBucket::new(tpm))),
        }
    }

    /// Returns `(file_index, vectors)` pairs in the same order as the input `files`,
    /// plus the `(file_index, chunk_index)` pairs dropped for exceeding the provider's
    /// context length (the vectors for a file omit those positions, in order).
    /// Fails the whole call on the first non-retryable or retry-exhausted batch.
    pub async fn embed_batches(
        &self,
        files: Vec<FileChunks>,
        progress: Option<BatchProgress>,
        cancel: CancellationToken,
    ) -> Result<BatchOutcome, IndexerError> {
        let mut slots: HashMap<usize, Vec<Option<Vec<f32>>>> = HashMap::new();
        for file in &files {
            slots.insert(file.file_index, vec![None; file.chunks.len()]);
        }

        let total_chunks: usize = files.iter().map(|f| f.chunks.len()).sum();
        let mut pending: VecDeque<Batch> = form_batches(&files).into();
        let total_batches = pending.len();
        let completed_chunks = Arc::new(AtomicUsize::new(0));
        let mut skipped: Vec<(usize, usize)> = Vec::new();

        let mut join_set: JoinSet<Result<(Vec<(usize, usize, Vec<f32>)>, Vec<(usize, usize)>), IndexerError>> =
            JoinSet::new();

        loop {
            while !cancel.is_cancelled() && !pending.is_empty() && join_set.len() < self.limiter.current_workers().max(1) {
                let batch = pending.pop_front().expect("checked non-empty");
                join_set.spawn(run_batch(
                    self.embedder.clone(),
                    self.limiter.clone(),
                    self.bucket.clone(),
                    batch,
                    total_batches,
                    total_chunks,
                    completed_chunks.clone(),
                    progress.clone(),
                    cancel.clone(),
                ));
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            match joined {
                Ok(Ok((entries, batch_skipped))) => {
                    for (file_index, chunk_index, vector) in entries {
                        if let Some(slot) = slots.get_mut(&file_index) {
                            if chunk_index < slot.len() {
                                slot[chunk_index] = Some(vector);
                            }
                        }
                    }
                    skipped.extend(batch_skipped);
                }
                Ok(Err(e)) => {
                    cancel.cancel();
                    join_set.abort_all();
                    return Err(e);
                }
                Err(join_err) => {
                    cancel.cancel();
                    join_set.abort_all();
                    return Err(IndexerError::BatchFailed {
                        batch_index: 0,
                        cause: join_err.to_string(),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(IndexerError::BatchFailed {
                batch_index: 0,
                cause: "cancelled".to_string(),
            });
        }

        let mut skipped_by_file: HashMap<usize, std::collections::HashSet<usize>> = HashMap::new();
        for (file_index, chunk_index) in &skipped {
            skipped_by_file.entry(*file_index).or_default().insert(*chunk_index);
        }

        let mut out = Vec::with_capacity(files.len());
        for file in &files {
            let slot = slots.remove(&file.file_index).unwrap_or_default();
            let skip_set = skipped_by_file.get(&file.file_index);
            let mut vectors = Vec::with_capacity(slot.len());
            for (chunk_index, v) in slot.into_iter().enumerate() {
                if skip_set.is_some_and(|s| s.contains(&chunk_index)) {
                    continue;
                }
                match v {
                    Some(vector) => vectors.push(vector),
                    None => {
                        return Err(IndexerError::Embed(EmbedError::ShapeMismatch {
                            expected: file.chunks.len(),
                            actual: chunk_index,
                        }))
                    }
                }
            }
            out.push((file.file_index, vectors));
        }
        Ok(BatchOutcome { vectors: out, skipped })
    }
}

/// Result of one `embed_batches` call: per-file vectors plus the chunks dropped for
/// exceeding the provider's context length (§9 open-question resolution: skip and
/// continue rather than fail the pass).
pub struct BatchOutcome {
    pub vectors: Vec<(usize, Vec<Vec<f32>>)>,
    pub skipped: Vec<(usize, usize)>,
}

#[allow(clippy::too_many_arguments)]
async fn run_batch(
    embedder: Arc<dyn Embedder>,
    limiter: Arc<AdaptiveRateLimiter>,
    bucket: Option<Arc<TokenBucket>>,
    mut batch: Batch,
    total_batches: usize,
    total_chunks: usize,
    completed_chunks: Arc<AtomicUsize>,
    progress: Option<BatchProgress>,
    cancel: CancellationToken,
) -> Result<(Vec<(usize, usize, Vec<f32>)>, Vec<(usize, usize)>), IndexerError> {
    let mut skipped: Vec<(usize, usize)> = Vec::new();
    let mut attempt = 0u32;
    loop {
        if batch.entries.is_empty() {
            return Ok((Vec::new(), skipped));
        }
        if cancel.is_cancelled() {
            return Err(IndexerError::BatchFailed {
                batch_index: batch.index,
                cause: "cancelled".to_string(),
            });
        }

        let texts: Vec<String> = batch.entries.iter().map(|e| e.content.clone()).collect();
        let batch_tokens: u64 = texts.iter().map(|t| estimate_tokens(t) as u64).sum();

        if let Some(bucket) = &bucket {
            bucket.acquire(batch_tokens).await;
        }

        match embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                limiter.on_success();
                let done = completed_chunks.fetch_add(batch.entries.len(), Ordering::SeqCst) + batch.entries.len();
                if let Some(p) = &progress {
                    p(BatchProgressEvent {
                        batch_index: batch.index,
                        total_batches,
                        completed_chunks: done,
                        total_chunks,
                        retrying: false,
                        attempt: 0,
                        status: 0,
                    });
                }
                let entries = batch
                    .entries
                    .into_iter()
                    .zip(vectors)
                    .map(|(e, v)| (e.file_index, e.chunk_index, v))
                    .collect();
                return Ok((entries, skipped));
            }
            Ok(vectors) => {
                return Err(IndexerError::Embed(EmbedError::ShapeMismatch {
                    expected: texts.len(),
                    actual: vectors.len(),
                }))
            }
            Err(EmbedError::ContextLength {
                chunk_index,
                estimated_tokens,
                max_tokens,
            }) if chunk_index < batch.entries.len() => {
                let offending = batch.entries.remove(chunk_index);
                log::warn!(
                    "skipping chunk {} of file index {} ({estimated_tokens} estimated tokens exceeds provider max {max_tokens}): context length exceeded",
                    offending.chunk_index, offending.file_index
                );
                skipped.push((offending.file_index, offending.chunk_index));
            }
            Err(err) => {
                if !err.is_retryable() || attempt >= RETRY_MAX_ATTEMPTS {
                    return Err(IndexerError::BatchFailed {
                        batch_index: batch.index,
                        cause: err.to_string(),
                    });
                }

                let status: u16 = match &err {
                    EmbedError::RateLimit { .. } => {
                        limiter.on_rate_limit_hit();
                        429
                    }
                    EmbedError::Server { status, .. } => *status,
                    _ => 0,
                };

                attempt += 1;
                if let Some(p) = &progress {
                    p(BatchProgressEvent {
                        batch_index: batch.index,
                        total_batches,
                        completed_chunks: completed_chunks.load(Ordering::SeqCst),
                        total_chunks,
                        retrying: true,
                        attempt,
                        status,
                    });
                }

                let delay = retry_delay(attempt, err.retry_after_secs());
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(IndexerError::BatchFailed {
                            batch_index: batch.index,
                            cause: "cancelled".to_string(),
                        });
                    }
                }
            }
        }
    }
}

fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs).min(RETRY_AFTER_CAP);
    }
    let base = (RETRY_BASE_DELAY_SECS * RETRY_MULTIPLIER.powi(attempt as i32 - 1)).min(RETRY_MAX_DELAY.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.0..base.max(0.001));
    Duration::from_secs_f64((base + jitter).min(RETRY_MAX_DELAY.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex as AsyncMutex;

    /// Fails the batch containing `oversized_text` with a context-length error exactly
    /// once, then succeeds on the retry with the shrunk entry list removed.
    struct ContextLengthOnceEmbedder {
        oversized_text: String,
        already_failed: AsyncMutex<bool>,
    }

    #[async_trait]
    impl Embedder for ContextLengthOnceEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(self.embed_batch(&[text.to_string()]).await?.remove(0))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let mut failed = self.already_failed.lock().await;
            if !*failed {
                if let Some(chunk_index) = texts.iter().position(|t| t == &self.oversized_text) {
                    *failed = true;
                    return Err(EmbedError::ContextLength {
                        chunk_index,
                        estimated_tokens: 100_000,
                        max_tokens: 8191,
                    });
                }
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }

        fn dimensions(&self) -> usize {
            1
        }

        async fn health_check(&self) -> Result<(), EmbedError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn context_length_error_skips_the_offending_chunk_and_continues() {
        let oversized = "x".repeat(50_000);
        let embedder = Arc::new(ContextLengthOnceEmbedder {
            oversized_text: oversized.clone(),
            already_failed: AsyncMutex::new(false),
        });
        let batch_embedder = BatchEmbedder::new(embedder, 1, None);

        let files = vec![FileChunks {
            file_index: 0,
            chunks: vec!["small one".to_string(), oversized, "small two".to_string()],
        }];

        let outcome = batch_embedder
            .embed_batches(files, None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.skipped, vec![(0, 1)]);
        let (file_index, vectors) = &outcome.vectors[0];
        assert_eq!(*file_index, 0);
        assert_eq!(vectors.len(), 2);
    }

    #[test]
    fn form_batches_splits_on_input_count_cap() {
        let chunks: Vec<String> = (0..MAX_INPUTS_PER_BATCH + 10).map(|i| format!("chunk {i}")).collect();
        let files = vec![FileChunks { file_index: 0, chunks }];
        let batches = form_batches(&files);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].entries.len(), MAX_INPUTS_PER_BATCH);
        assert_eq!(batches[1].entries.len(), 10);
    }

    #[test]
    fn oversized_single_chunk_gets_its_own_batch() {
        let huge = "x".repeat((MAX_TOKENS_PER_BATCH + 1) * 4);
        let files = vec![FileChunks {
            file_index: 0,
            chunks: vec!["small".to_string(), huge, "small2".to_string()],
        }];
        let batches = form_batches(&files);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].entries.len(), 1);
    }

    #[test]
    fn limiter_halves_workers_after_three_429s_with_floor_one() {
        let limiter = AdaptiveRateLimiter::new(4);
        limiter.on_rate_limit_hit();
        limiter.on_rate_limit_hit();
        assert_eq!(limiter.current_workers(), 4);
        limiter.on_rate_limit_hit();
        assert_eq!(limiter.current_workers(), 2);

        for _ in 0..3 {
            limiter.on_rate_limit_hit();
        }
        assert_eq!(limiter.current_workers(), 1);
        for _ in 0..3 {
            limiter.on_rate_limit_hit();
        }
        assert_eq!(limiter.current_workers(), 1);
    }

    #[test]
    fn limiter_restores_one_worker_after_ten_successes_capped_at_max() {
        let limiter = AdaptiveRateLimiter::new(2);
        limiter.on_rate_limit_hit();
        limiter.on_rate_limit_hit();
        limiter.on_rate_limit_hit();
        assert_eq!(limiter.current_workers(), 1);

        for _ in 0..10 {
            limiter.on_success();
        }
        assert_eq!(limiter.current_workers(), 2);

        for _ in 0..10 {
            limiter.on_success();
        }
        assert_eq!(limiter.current_workers(), 2);
    }

    #[test]
    fn retry_delay_respects_retry_after_and_cap() {
        assert_eq!(retry_delay(1, Some(5)), Duration::from_secs(5));
        assert_eq!(retry_delay(1, Some(1000)), RETRY_AFTER_CAP);
    }

    #[test]
    fn retry_delay_backs_off_exponentially_within_bounds() {
        let d1 = retry_delay(1, None);
        let d5 = retry_delay(5, None);
        assert!(d1 >= Duration::from_secs(1) && d1 <= Duration::from_secs(2));
        assert!(d5 <= RETRY_MAX_DELAY * 2);
    }

    #[tokio::test]
    async fn token_bucket_releases_once_window_frees_capacity() {
        let bucket = TokenBucket::new(100);
        bucket.acquire(100).await;
        {
            let mut usage = bucket.usage.lock().unwrap();
            let distant_past = Instant::now() - Duration::from_secs(61);
            usage.clear();
            usage.push_back((distant_past, 100));
        }
        bucket.acquire(50).await;
        assert!(bucket.usage.lock().unwrap().iter().map(|(_, n)| n).sum::<u64>() <= 100);
    }
}
