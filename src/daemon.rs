use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::ConfigError;
use crate::ignore_matcher::IgnoreMatcher;
use crate::search::embedder::create_embedder;
use crate::search::indexer::Indexer;
use crate::search::store::{LocalStore, VectorStore};
use crate::search::watcher::{FileEventKind, Watcher};

const PERSIST_INTERVAL: Duration = Duration::from_secs(30);

/// Guards a single running daemon instance per project via a PID file, per
/// SPEC_FULL.md §4.11.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquires the PID file at `path`, replacing it if it is stale (no live process
    /// holds it). Fails with [`ConfigError::AlreadyRunning`] if a live process does.
    pub fn acquire(path: &Path) -> Result<Self, ConfigError> {
        if let Ok(existing) = std::fs::read_to_string(path) {
            if let Ok(pid) = existing.trim().parse::<u32>() {
                if process_is_alive(pid) {
                    return Err(ConfigError::AlreadyRunning(pid));
                }
                log::info!("removing stale pid file for pid {pid}");
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Connectivity {
                endpoint: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(path, format!("{}\n", std::process::id())).map_err(|e| ConfigError::Connectivity {
            endpoint: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { path: path.to_path_buf() })
    }

    pub fn release(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn process_is_alive(pid: u32) -> bool {
    // Signal 0 performs no action but still validates the pid exists and is reachable.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Runs the daemon loop: PID-file acquisition, an initial full index pass, then the
/// supervisor `tokio::select!` loop over watcher events, periodic persist, and signals.
pub async fn run(root: &Path, config: &Config, pid_path: &Path, cancel: CancellationToken) -> anyhow::Result<()> {
    let pid_file = PidFile::acquire(pid_path)?;
    let result = run_supervised(root, config, cancel).await;
    pid_file.release();
    result
}

async fn run_supervised(root: &Path, config: &Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let ignore = Arc::new(IgnoreMatcher::build(
        root,
        config.ignore.external_gitignore.as_deref().map(Path::new),
        &config.ignore.extra_dirs,
    ));
    let store: Arc<dyn VectorStore> = Arc::new(LocalStore::new(root.join(&config.store.path)));
    let embedder = Arc::from(create_embedder(&config.embedder));
    let indexer = Arc::new(Indexer::new(
        store.clone(),
        embedder,
        config.embedder.provider.as_str(),
        &config.embedder.model,
        &config.chunking,
        config.embedder.parallelism.unwrap_or(4),
        config.embedder.tokens_per_minute,
    ));

    let started = Instant::now();
    store.load().await?;
    let last_index_time = store.get_stats().await?.last_updated;
    let initial = indexer.index_all(root, &ignore, cancel.clone(), None, last_index_time).await?;
    log::info!(
        "initial index pass: {} indexed, {} skipped, {} removed in {:?}",
        initial.files_indexed,
        initial.files_skipped,
        initial.files_removed,
        started.elapsed()
    );

    let watcher = Watcher::new(root, ignore.clone(), config.watch.debounce_ms);
    let mut events = watcher.start(cancel.clone())?;

    let mut persist_tick = tokio::time::interval(PERSIST_INTERVAL);
    persist_tick.tick().await; // first tick fires immediately; skip it

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                let result = match event.kind {
                    FileEventKind::Create | FileEventKind::Modify => {
                        indexer.index_one(root, &ignore, &event.path).await
                    }
                    FileEventKind::Delete => indexer.remove_path(&event.path).await,
                    FileEventKind::Rename => {
                        // Only one side of the move was observed (watcher::classify
                        // splits a both-sides-known rename into Delete+Create
                        // already), so the new location is unknown; drop the stale
                        // entry at the one path we do have.
                        indexer.remove_path(event.old_path.as_deref().unwrap_or(&event.path)).await
                    }
                };
                if let Err(e) = result {
                    log::warn!("incremental index of {} failed: {e}", event.path);
                }
            }
            _ = persist_tick.tick() => {
                if let Err(e) = store.persist().await {
                    log::warn!("periodic persist failed: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                log::info!("received SIGTERM, shutting down");
                break;
            }
            _ = cancel.cancelled() => {
                log::info!("cancelled, shutting down");
                break;
            }
        }
    }

    store.persist().await?;
    Ok(())
}
