//! Daemon loop: initial sync, watcher worker, periodic passes
//!
//! After the initial full reconciliation the daemon keeps three things
//! running until shutdown: the event worker draining the watcher channels,
//! the periodic full-sync ticker, and the shutdown watcher on the root
//! cancellation token.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::sync::SyncManager;
use crate::watch::FsWatcher;

/// Grace window for in-flight workers after shutdown is signalled
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Runtime switches for [`Daemon::run`], derived from [`Config`]
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub watch_enabled: bool,
    pub debounce: Duration,
    /// Zero disables periodic sync
    pub interval: Duration,
    pub bidirectional: bool,
}

impl DaemonOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            watch_enabled: config.watch.enabled,
            debounce: config.watch.debounce(),
            interval: config.sync.interval(),
            bidirectional: config.sync.bidirectional,
        }
    }
}

/// The long-running sync daemon
pub struct Daemon {
    manager: Arc<SyncManager>,
    options: DaemonOptions,
    shutdown: CancellationToken,
}

impl Daemon {
    #[must_use]
    pub fn new(manager: Arc<SyncManager>, options: DaemonOptions) -> Self {
        Self {
            manager,
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the daemon when cancelled
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// The initial full sync may fail (typically an unreachable server)
    /// without stopping the daemon; the watcher and periodic passes carry
    /// on and converge once the server is back.
    ///
    /// # Errors
    /// Returns an error only if the watcher cannot be started.
    pub async fn run(&self) -> Result<()> {
        info!("performing initial sync");
        if let Err(err) = self.manager.full_sync(&self.shutdown).await {
            error!(%err, "initial sync failed");
        }

        let mut watcher = None;
        let mut workers = Vec::new();

        if self.options.watch_enabled {
            let (fs_watcher, events, errors) = FsWatcher::start(
                self.manager.root(),
                self.manager.matcher().clone(),
                self.options.debounce,
            )?;
            info!("file watcher started");

            workers.push(tokio::spawn(event_worker(
                Arc::clone(&self.manager),
                events,
                errors,
                self.shutdown.clone(),
            )));
            watcher = Some(fs_watcher);
        }

        if self.options.bidirectional && !self.options.interval.is_zero() {
            info!(interval = ?self.options.interval, "periodic sync enabled");
            workers.push(tokio::spawn(periodic_worker(
                Arc::clone(&self.manager),
                self.options.interval,
                self.shutdown.clone(),
            )));
        }

        info!("daemon ready");
        self.shutdown.cancelled().await;
        info!("shutting down");

        if let Some(watcher) = watcher {
            watcher.stop();
        }
        for worker in workers {
            if tokio::time::timeout(SHUTDOWN_GRACE, worker).await.is_err() {
                warn!("worker did not stop within the grace window");
            }
        }

        Ok(())
    }
}

/// Drain the watcher's event and error channels until shutdown
async fn event_worker(
    manager: Arc<SyncManager>,
    mut events: tokio::sync::mpsc::Receiver<crate::watch::ChangeEvent>,
    mut errors: tokio::sync::mpsc::Receiver<notify::Error>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            event = events.recv() => match event {
                None => return,
                Some(event) => {
                    debug!(path = event.path, op = %event.op, "file change detected");
                    if let Err(err) = manager.handle_event(&event).await {
                        error!(path = event.path, %err, "failed to handle local change");
                    }
                }
            },
            err = errors.recv() => match err {
                None => return,
                Some(err) => error!(%err, "watcher error"),
            },
        }
    }
}

/// Fire full syncs on a fixed interval until shutdown.
///
/// Passes run inline on this task, so they never overlap; with
/// [`MissedTickBehavior::Skip`] a tick that lands during a running pass is
/// simply dropped.
async fn periodic_worker(manager: Arc<SyncManager>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the initial sync already covered it.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                debug!("running periodic sync");
                if let Err(err) = manager.full_sync(&shutdown).await {
                    error!(%err, "periodic sync failed");
                }
            }
        }
    }
}
