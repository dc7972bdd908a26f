//! File change notifications for indexed units
//!
//! Keeps a change source subscribed to exactly the paths the [`UnitStore`]
//! tracks, and turns each change into a reparse job on the parse pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌───────────────┐     ┌───────────┐
//! │   notify    │────>│  debouncer  │────>│ WatcherBridge │────>│ parse pool│
//! │   watcher   │     │             │     │  (coalesce)   │     │ (reparse) │
//! └─────────────┘     └─────────────┘     └───────────────┘     └───────────┘
//! ```
//!
//! Events for a path whose reparse is already running only set its pending
//! flag, so any burst of changes costs at most one extra parse.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use parking_lot::Mutex;

use crate::error::{IndexError, Result};
use crate::parser::UnitParser;

use super::jobs::{JobHandle, JobRunner};
use super::unit_store::{ReparseOutcome, ReparseRequest, UnitStore};

/// Something that reports file changes for subscribed paths
pub trait ChangeSource: Send {
    fn subscribe(&mut self, path: &Path) -> Result<()>;
    fn unsubscribe(&mut self, path: &Path) -> Result<()>;
}

/// Change source for a daemon running without file watching
#[derive(Debug, Default)]
pub struct NullSource;

impl ChangeSource for NullSource {
    fn subscribe(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn unsubscribe(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// `notify` backed change source.
///
/// Watches the parent directory of each subscribed file (non-recursively) so
/// that editors which replace files by rename keep reporting changes.
pub struct NotifySource {
    debouncer: Debouncer<RecommendedWatcher>,
    dirs: HashMap<PathBuf, usize>,
}

impl NotifySource {
    /// Create the source and the channel its changed paths arrive on
    pub fn new(debounce: Duration) -> Result<(Self, mpsc::Receiver<PathBuf>)> {
        let (tx, rx) = mpsc::channel();
        let debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
            Ok(events) => {
                tracing::debug!("[WATCHER] Received {} debounced events", events.len());
                for event in events {
                    if matches!(event.kind, DebouncedEventKind::Any) {
                        let _ = tx.send(event.path);
                    }
                }
            }
            Err(e) => tracing::error!("Watcher error: {:?}", e),
        })
        .map_err(watch_error)?;

        Ok((
            Self {
                debouncer,
                dirs: HashMap::new(),
            },
            rx,
        ))
    }
}

impl ChangeSource for NotifySource {
    fn subscribe(&mut self, path: &Path) -> Result<()> {
        let dir = parent_dir(path)?;
        let count = self.dirs.entry(dir.clone()).or_insert(0);
        if *count == 0 {
            self.debouncer
                .watcher()
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(watch_error)?;
            tracing::debug!("[WATCHER] Watching {}", dir.display());
        }
        *count += 1;
        Ok(())
    }

    fn unsubscribe(&mut self, path: &Path) -> Result<()> {
        let dir = parent_dir(path)?;
        let Some(count) = self.dirs.get_mut(&dir) else {
            return Ok(());
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.dirs.remove(&dir);
            self.debouncer.watcher().unwatch(&dir).map_err(watch_error)?;
            tracing::debug!("[WATCHER] Stopped watching {}", dir.display());
        }
        Ok(())
    }
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    path.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| IndexError::malformed(format!("{} has no parent directory", path.display())))
}

fn watch_error(e: notify::Error) -> IndexError {
    IndexError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

struct WatchState {
    source: Box<dyn ChangeSource>,
    watched: BTreeSet<PathBuf>,
}

/// Connects a [`ChangeSource`] to the [`UnitStore`]
pub struct WatcherBridge<P: UnitParser> {
    units: Arc<UnitStore<P>>,
    parse_pool: Arc<JobRunner>,
    state: Mutex<WatchState>,
}

impl<P: UnitParser> WatcherBridge<P> {
    pub fn new(
        units: Arc<UnitStore<P>>,
        parse_pool: Arc<JobRunner>,
        source: Box<dyn ChangeSource>,
    ) -> Self {
        Self {
            units,
            parse_pool,
            state: Mutex::new(WatchState {
                source,
                watched: BTreeSet::new(),
            }),
        }
    }

    /// Subscribe to new paths and unsubscribe from forgotten ones so the
    /// watched set equals the store's tracked paths.
    pub fn sync_subscriptions(&self) {
        let desired: BTreeSet<PathBuf> = self.units.paths().into_iter().collect();
        let mut state = self.state.lock();

        let stale: Vec<PathBuf> = state.watched.difference(&desired).cloned().collect();
        for path in stale {
            if let Err(e) = state.source.unsubscribe(&path) {
                tracing::warn!("Cannot stop watching {}: {}", path.display(), e);
            }
            state.watched.remove(&path);
        }

        let fresh: Vec<PathBuf> = desired.difference(&state.watched).cloned().collect();
        for path in fresh {
            match state.source.subscribe(&path) {
                Ok(()) => {
                    state.watched.insert(path);
                }
                Err(e) => tracing::warn!("Cannot watch {}: {}", path.display(), e),
            }
        }
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        self.state.lock().watched.iter().cloned().collect()
    }

    /// React to a change of `path`. Returns the reparse job when one was
    /// started; `None` for unknown paths or when the change was coalesced
    /// into a reparse already in flight.
    pub fn on_path_changed(&self, path: &Path) -> Option<JobHandle<ReparseOutcome>> {
        if !self.state.lock().watched.contains(path) {
            tracing::trace!("[WATCHER] Ignoring {}", path.display());
            return None;
        }

        match self.units.begin_reparse(path) {
            ReparseRequest::NotTracked | ReparseRequest::Coalesced => None,
            ReparseRequest::Started(ticket) => {
                tracing::info!("[WATCHER] Reparsing {}", path.display());
                let units = Arc::clone(&self.units);
                let name = format!("reparse {}", path.display());
                Some(self.parse_pool.spawn(name, move || units.run_reparse(ticket)))
            }
        }
    }

    /// Spawn the thread that feeds `events` into [`Self::on_path_changed`]
    pub fn start(self: &Arc<Self>, events: mpsc::Receiver<PathBuf>) -> WatcherHandle {
        let running = Arc::new(AtomicBool::new(true));
        let handle_running = Arc::clone(&running);
        let bridge = Arc::clone(self);

        let thread = std::thread::Builder::new()
            .name("cindex-watcher".to_string())
            .spawn(move || {
                while handle_running.load(Ordering::SeqCst) {
                    match events.recv_timeout(Duration::from_millis(100)) {
                        Ok(path) => {
                            bridge.on_path_changed(&path);
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("[WATCHER] Event loop stopped");
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(e) => {
                tracing::error!("Cannot start watcher thread: {}", e);
                running.store(false, Ordering::SeqCst);
                None
            }
        };

        WatcherHandle { running, thread }
    }
}

/// Handle for the watcher event thread; stops it when dropped
pub struct WatcherHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Stop the event thread and wait for it to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
