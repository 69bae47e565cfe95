use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// One debounced batch of source changes under a database root.
#[derive(Debug, Clone)]
pub struct WatcherEvent {
    pub paths: Vec<PathBuf>,
}

/// Watches `schema.yaml` and the `data/` directory of a database root
/// and emits debounced change batches for the caller to re-export on.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    /// Handle to the background thread batching events
    _thread: std::thread::JoinHandle<()>,
    /// Receiver for debounced change batches
    pub event_rx: mpsc::Receiver<WatcherEvent>,
}

impl FileWatcher {
    /// Start watching the database root. Batches are flushed after
    /// 100ms of quiet and available via `event_rx`.
    pub fn start(root: &Path) -> Result<Self, notify::Error> {
        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
        let (event_tx, event_rx) = mpsc::channel::<WatcherEvent>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default(),
        )?;

        let schema = root.join("schema.yaml");
        if schema.exists() {
            watcher.watch(&schema, RecursiveMode::NonRecursive)?;
        }
        let data = root.join("data");
        if data.exists() {
            watcher.watch(&data, RecursiveMode::Recursive)?;
        }

        // Background thread batches events until the input goes quiet
        let thread = std::thread::spawn(move || {
            let debounce = Duration::from_millis(100);
            let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
            let mut last_event = Instant::now();

            loop {
                match notify_rx.recv_timeout(debounce) {
                    Ok(Ok(event)) => {
                        let relevant = matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        );
                        if relevant {
                            for path in event.paths {
                                if is_source_file(&path) {
                                    pending.insert(path);
                                }
                            }
                        }
                        last_event = Instant::now();
                    }
                    Ok(Err(e)) => {
                        log::warn!("file watcher error: {e}");
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if !pending.is_empty() && last_event.elapsed() >= debounce {
                            let paths = std::mem::take(&mut pending).into_iter().collect();
                            if event_tx.send(WatcherEvent { paths }).is_err() {
                                return; // Receiver dropped
                            }
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        break;
                    }
                }
            }
        });

        Ok(FileWatcher {
            _watcher: watcher,
            _thread: thread,
            event_rx,
        })
    }
}

/// Check if a path is a schema or data source file.
fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
