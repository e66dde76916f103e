use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::WatcherError;
use crate::ignore_matcher::IgnoreMatcher;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Create,
    Modify,
    Delete,
    Rename,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: String,
    /// Populated for `Rename` only: when just one side of the move is known (notify
    /// reports `RenameMode::From`/`::To` separately rather than `::Both`), `path` and
    /// `old_path` both carry that single known path. When both sides are known the
    /// rename is instead split into a `Delete` for the old path and a `Create` for the
    /// new one, so a combined `Rename` event never carries two distinct paths.
    pub old_path: Option<String>,
}

/// Debounced, ignore-filtered filesystem event stream below a project root, per
/// SPEC_FULL.md §4.9. Bursts of events on the same path within `debounce_ms` collapse
/// to one, last-kind-wins.
pub struct Watcher {
    root: PathBuf,
    ignore: Arc<IgnoreMatcher>,
    debounce: Duration,
}

impl Watcher {
    pub fn new(root: &Path, ignore: Arc<IgnoreMatcher>, debounce_ms: u64) -> Self {
        Self {
            root: root.to_path_buf(),
            ignore,
            debounce: Duration::from_millis(debounce_ms),
        }
    }

    /// Starts the native filesystem watcher and spawns the debouncing task. The task
    /// exits once `cancel` fires or the returned receiver is dropped.
    pub fn start(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<FileEvent>, WatcherError> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res| {
                let _ = raw_tx.send(res);
            })
            .map_err(|source| WatcherError::Watch {
                path: self.root.display().to_string(),
                source,
            })?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|source| WatcherError::Watch {
                path: self.root.display().to_string(),
                source,
            })?;

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let root = self.root.clone();
        let ignore = self.ignore.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            let _watcher = watcher;
            let mut state = DebounceState::new(debounce);
            let mut outgoing: VecDeque<FileEvent> = VecDeque::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe_event = raw_rx.recv() => {
                        match maybe_event {
                            Some(Ok(event)) => state.record(&root, &ignore, event),
                            Some(Err(e)) => log::warn!("watch error: {e}"),
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(state.next_wait()) => {}
                }

                for event in state.drain_ready() {
                    push_bounded(&mut outgoing, event);
                }

                while let Some(event) = outgoing.pop_front() {
                    match out_tx.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(event)) => {
                            outgoing.push_front(event);
                            break;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return,
                    }
                }
            }
        });

        Ok(out_rx)
    }
}

/// Queues `event` for delivery, enforcing `CHANNEL_CAPACITY` without ever blocking the
/// debounce task. A later event for a path already queued replaces the earlier one
/// (same collapse the debounce step does), unless the queued entry is a `Delete` or
/// `Rename` — those are never displaced. If the queue is still at capacity after that,
/// the oldest displaceable (non-`Delete`/`Rename`) entry is dropped to make room.
fn push_bounded(queue: &mut VecDeque<FileEvent>, event: FileEvent) {
    if let Some(pos) = queue.iter().position(|e| e.path == event.path) {
        if matches!(queue[pos].kind, FileEventKind::Delete | FileEventKind::Rename) {
            return;
        }
        queue.remove(pos);
    }

    if queue.len() >= CHANNEL_CAPACITY {
        if let Some(pos) = queue
            .iter()
            .position(|e| !matches!(e.kind, FileEventKind::Delete | FileEventKind::Rename))
        {
            queue.remove(pos);
        }
    }

    queue.push_back(event);
}

struct Pending {
    kind: FileEventKind,
    old_path: Option<String>,
    last_seen: Instant,
}

struct DebounceState {
    debounce: Duration,
    pending: HashMap<String, Pending>,
}

impl DebounceState {
    fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: HashMap::new(),
        }
    }

    /// Last-kind-wins: a later event for the same path simply overwrites the pending
    /// entry, which is exactly the collapse semantics SPEC_FULL.md §4.9 calls for.
    fn record(&mut self, root: &Path, ignore: &IgnoreMatcher, event: Event) {
        for (path, kind, old_path) in classify(&event) {
            let rel = relative(root, &path);
            if ignore.should_ignore(&rel, path.is_dir()) {
                continue;
            }
            self.pending.insert(
                rel,
                Pending {
                    kind,
                    old_path: old_path.map(|p| relative(root, &p)),
                    last_seen: Instant::now(),
                },
            );
        }
    }

    fn next_wait(&self) -> Duration {
        self.pending
            .values()
            .map(|p| self.debounce.saturating_sub(p.last_seen.elapsed()))
            .min()
            .unwrap_or(Duration::from_millis(50))
    }

    fn drain_ready(&mut self) -> Vec<FileEvent> {
        let debounce = self.debounce;
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.last_seen.elapsed() >= debounce)
            .map(|(path, _)| path.clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|path| {
                self.pending.remove(&path).map(|p| FileEvent {
                    kind: p.kind,
                    path,
                    old_path: p.old_path,
                })
            })
            .collect()
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

/// Splits a raw `notify::Event` into `(path, kind, old_path)` triples. `old_path` is
/// the pre-relativization path; `record` relativizes it against `root` the same way it
/// does the primary path.
fn classify(event: &Event) -> Vec<(PathBuf, FileEventKind, Option<PathBuf>)> {
    match &event.kind {
        EventKind::Create(_) => event.paths.iter().map(|p| (p.clone(), FileEventKind::Create, None)).collect(),
        EventKind::Remove(_) => event.paths.iter().map(|p| (p.clone(), FileEventKind::Delete, None)).collect(),
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => {
            if event.paths.len() == 2 {
                // Both sides of the move are known: expose it as delete-then-create
                // rather than a single combined rename, per SPEC_FULL.md §4.9.
                vec![
                    (event.paths[0].clone(), FileEventKind::Delete, None),
                    (event.paths[1].clone(), FileEventKind::Create, None),
                ]
            } else if let Some(path) = event.paths.first() {
                // Only one side observed (RenameMode::From/To rather than ::Both): a
                // single rename event carrying that path as its own old path.
                vec![(path.clone(), FileEventKind::Rename, Some(path.clone()))]
            } else {
                Vec::new()
            }
        }
        EventKind::Modify(_) => event.paths.iter().map(|p| (p.clone(), FileEventKind::Modify, None)).collect(),
        _ => Vec::new(),
    }
}
