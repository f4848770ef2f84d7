//! Debounced filesystem watching
//!
//! Raw notifications from the OS watcher are coalesced per path: a new raw
//! event restarts that path's quiet-period timer, and only the latest raw
//! event survives to the output channel once the timer expires. Ignored
//! paths and the reserved sync directory are filtered before debouncing.
//!
//! Renames surface as a remove of the old path and a create of the new one;
//! no attempt is made to correlate the pair. The periodic full sync is the
//! backstop for anything dropped here.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ignore::IgnoreMatcher;
use crate::index::in_sync_dir;
use crate::scan::rel_path;

/// Capacity of the delivered-events channel; overflow drops with a warning
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of the watcher-error channel
const ERROR_CHANNEL_CAPACITY: usize = 10;

/// The kind of change observed on a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Write,
    Remove,
    Rename,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Remove => "remove",
            Self::Rename => "rename",
        };
        write!(f, "{name}")
    }
}

/// A debounced change event for one path
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// `/`-separated path relative to the watched root
    pub path: String,
    pub op: Op,
    /// Arrival time of the latest raw event for this path
    pub time: DateTime<Utc>,
}

struct Pending {
    event: ChangeEvent,
    generation: u64,
}

/// Recursive watcher over the sync root with per-path debouncing.
///
/// Obtained from [`FsWatcher::start`] together with the event and error
/// receivers. Dropping the watcher or calling [`FsWatcher::stop`] releases
/// the OS subscription, cancels pending timers, and closes both channels.
pub struct FsWatcher {
    stop: CancellationToken,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FsWatcher {
    /// Start watching `root` recursively. Must be called within a tokio
    /// runtime.
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or the root
    /// cannot be watched.
    pub fn start(
        root: impl Into<PathBuf>,
        matcher: IgnoreMatcher,
        debounce: Duration,
    ) -> Result<(
        Self,
        mpsc::Receiver<ChangeEvent>,
        mpsc::Receiver<notify::Error>,
    )> {
        let root = root.into();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let stop = CancellationToken::new();

        // The notify callback runs on the OS watcher's thread; an unbounded
        // send keeps it non-blocking.
        let mut watcher = notify::recommended_watcher(move |result| {
            let _ = raw_tx.send(result);
        })?;
        // Recursive mode brings newly created subdirectories into the watch
        // set; the brief window before that happens is healed by the
        // periodic full sync.
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let debouncer = Debouncer {
            root,
            matcher,
            debounce,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
            events_tx,
            stop: stop.clone(),
        };
        tokio::spawn(debouncer.run(raw_rx, errors_tx));

        Ok((
            Self {
                stop,
                watcher: Mutex::new(Some(watcher)),
            },
            events_rx,
            errors_rx,
        ))
    }

    /// Stop watching: cancels pending debounce timers, closes the event and
    /// error channels, and releases the OS subscription. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
        if let Ok(mut guard) = self.watcher.lock() {
            guard.take();
        }
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Debouncer {
    root: PathBuf,
    matcher: IgnoreMatcher,
    debounce: Duration,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    generations: Arc<AtomicU64>,
    events_tx: mpsc::Sender<ChangeEvent>,
    stop: CancellationToken,
}

impl Debouncer {
    async fn run(
        self,
        mut raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
        errors_tx: mpsc::Sender<notify::Error>,
    ) {
        loop {
            tokio::select! {
                () = self.stop.cancelled() => break,
                raw = raw_rx.recv() => match raw {
                    None => break,
                    Some(Ok(event)) => self.handle_raw(event),
                    Some(Err(err)) => {
                        if errors_tx.try_send(err).is_err() {
                            warn!("watcher error channel full, dropping error");
                        }
                    }
                },
            }
        }
    }

    fn handle_raw(&self, event: notify::Event) {
        let Some(op) = map_event_kind(&event.kind) else {
            return;
        };

        for path in &event.paths {
            let Some(rel) = rel_path(&self.root, path) else {
                continue;
            };
            if in_sync_dir(&rel) {
                continue;
            }
            if self.matcher.is_ignored(&rel) {
                debug!(path = rel, "ignoring event");
                continue;
            }

            self.debounce_event(ChangeEvent {
                path: rel,
                op,
                time: Utc::now(),
            });
        }
    }

    /// Overwrite this path's pending event and restart its quiet-period
    /// timer. Each raw event takes a fresh generation; a timer only fires
    /// if its generation is still the latest when it wakes.
    fn debounce_event(&self, event: ChangeEvent) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let path = event.path.clone();

        {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.insert(path.clone(), Pending { event, generation });
        }

        let pending = Arc::clone(&self.pending);
        let events_tx = self.events_tx.clone();
        let stop = self.stop.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::select! {
                () = stop.cancelled() => return,
                () = tokio::time::sleep(debounce) => {}
            }

            let fired = {
                let mut pending = pending.lock().expect("pending map poisoned");
                match pending.get(&path) {
                    Some(entry) if entry.generation == generation => pending.remove(&path),
                    _ => None, // superseded by a newer raw event
                }
            };

            if let Some(entry) = fired {
                if events_tx.try_send(entry.event).is_err() {
                    warn!(path, "event channel full, dropping event");
                }
            }
        });
    }
}

fn map_event_kind(kind: &EventKind) -> Option<Op> {
    match kind {
        EventKind::Create(_) => Some(Op::Create),
        // A rename is a remove of the old name and a create of the new one.
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Op::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Op::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(Op::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(Op::Write),
        EventKind::Remove(_) => Some(Op::Remove),
        _ => None,
    }
}
