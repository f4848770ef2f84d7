//! Bidirectional reconciliation
//!
//! The [`SyncManager`] owns the in-memory index and is the only component
//! that mutates it or issues remote writes. A full pass fuses three views of
//! every path — the remote listing, the local scan, and the indexed past —
//! and picks one action per path; watcher events take the short path
//! (upload or remote delete) between passes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use color_eyre::eyre::{bail, Result};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classify::is_binary;
use crate::hash::ContentHash;
use crate::ignore::IgnoreMatcher;
use crate::index::{FileState, Index, IndexStore, Source};
use crate::remote::{RemoteFileMeta, WorkspaceTransport};
use crate::scan::{FileEntry, Scanner};
use crate::watch::{ChangeEvent, Op};

/// Drives reconciliation between the local root and the remote workspace
pub struct SyncManager {
    transport: Arc<dyn WorkspaceTransport>,
    root: PathBuf,
    matcher: IgnoreMatcher,
    store: IndexStore,
    index: RwLock<Index>,
}

impl SyncManager {
    /// Create a manager, loading any persisted index from the reserved
    /// directory under `root`.
    ///
    /// # Errors
    /// Returns an error if the reserved directory cannot be created.
    pub fn new(
        transport: Arc<dyn WorkspaceTransport>,
        root: impl Into<PathBuf>,
        ignore_patterns: &[String],
        user_id: impl Into<String>,
    ) -> Result<Self> {
        let root = root.into();
        let store = IndexStore::new(&root)?;
        let index = store.load(&user_id.into());

        Ok(Self {
            transport,
            root,
            matcher: IgnoreMatcher::new(ignore_patterns),
            store,
            index: RwLock::new(index),
        })
    }

    /// The local sync root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The compiled ignore matcher, shared with the watcher
    #[must_use]
    pub fn matcher(&self) -> &IgnoreMatcher {
        &self.matcher
    }

    /// A copy of the current in-memory index
    pub async fn current_index(&self) -> Index {
        self.index.read().await.clone()
    }

    /// Run one full reconciliation pass.
    ///
    /// Per-path failures are logged and skipped; the pass itself fails only
    /// when the remote listing cannot be fetched, the local scan fails, or
    /// the pass is cancelled.
    ///
    /// # Errors
    /// See above; per-path errors never surface here.
    pub async fn full_sync(&self, cancel: &CancellationToken) -> Result<()> {
        info!("starting full sync");

        let listing = self.transport.list_files().await?;
        let local = Scanner::new(&self.root, self.matcher.clone()).scan()?;

        // Indexed paths join the union so entries whose file is gone on
        // both sides still get visited and pruned.
        let mut paths: BTreeSet<String> = listing
            .files
            .keys()
            .chain(local.keys())
            .cloned()
            .collect();
        paths.extend(self.index.read().await.files.keys().cloned());

        for path in &paths {
            if cancel.is_cancelled() {
                bail!("full sync cancelled");
            }

            let remote = listing.files.get(path);
            let entry = local.get(path);
            if let Err(err) = self.sync_path(path, remote, entry).await {
                error!(path, %err, "failed to sync file");
            }
        }

        {
            let mut index = self.index.write().await;
            index.last_sync = Utc::now();
        }
        self.persist_index().await;

        info!(files = paths.len(), "full sync completed");
        Ok(())
    }

    /// Apply one debounced watcher event.
    ///
    /// # Errors
    /// Returns the per-file error; callers log and continue.
    pub async fn handle_event(&self, event: &ChangeEvent) -> Result<()> {
        debug!(path = event.path, op = %event.op, "handling local change");

        match event.op {
            Op::Create | Op::Write => self.upload(&event.path).await?,
            Op::Remove => self.delete_remote(&event.path).await?,
            // The watcher surfaces the underlying remove+create pair for
            // renames it could attribute; an uncorrelated rename needs no
            // direct action.
            Op::Rename => return Ok(()),
        }

        self.persist_index().await;
        Ok(())
    }

    /// Decide and execute the action for one path given the three views
    async fn sync_path(
        &self,
        path: &str,
        remote: Option<&RemoteFileMeta>,
        local: Option<&FileEntry>,
    ) -> Result<()> {
        let indexed = self.indexed(path).await;

        match (remote, local) {
            (Some(remote), Some(local)) => {
                if remote.hash == local.hash {
                    // Same content on both sides: record it, no transfer.
                    self.update_index(path, local.hash.clone(), local.size, local.modified, Source::Both)
                        .await;
                    Ok(())
                } else if local.modified > remote.modified {
                    info!(path, "local file newer, uploading");
                    self.upload(path).await
                } else if remote.modified > local.modified {
                    info!(path, "remote file newer, downloading");
                    self.download(path).await
                } else {
                    // Equal mtimes with different content: prefer the
                    // user's local copy.
                    info!(path, "conflict at equal mtime, keeping local");
                    self.upload(path).await
                }
            }
            (Some(_), None) => {
                if indexed.is_some() {
                    info!(path, "file deleted locally, removing from remote");
                    self.delete_remote(path).await
                } else {
                    info!(path, "new remote file, downloading");
                    self.download(path).await
                }
            }
            (None, Some(_)) => {
                if indexed.is_some() {
                    info!(path, "file deleted remotely, removing locally");
                    self.delete_local(path).await
                } else {
                    info!(path, "new local file, uploading");
                    self.upload(path).await
                }
            }
            (None, None) => {
                // Gone on both sides; forget it.
                self.remove_from_index(path).await;
                Ok(())
            }
        }
    }

    /// Upload one local file, skipping empty and binary content
    async fn upload(&self, path: &str) -> Result<()> {
        let full_path = self.root.join(path);

        let metadata = std::fs::metadata(&full_path)?;
        if metadata.is_dir() {
            debug!(path, "skipping directory");
            return Ok(());
        }

        let content = std::fs::read(&full_path)?;
        if content.is_empty() {
            warn!(path, "skipping empty file");
            return Ok(());
        }
        if is_binary(&content) {
            debug!(path, "skipping binary file");
            return Ok(());
        }

        let meta = self
            .transport
            .put_file(path, Bytes::from(content))
            .await?;

        // Index the local mtime so the next pass compares against what is
        // actually on disk.
        let modified = std::fs::metadata(&full_path)?.modified()?.into();
        self.update_index(path, meta.hash, meta.size, modified, Source::Local)
            .await;
        info!(path, "uploaded");
        Ok(())
    }

    /// Download one remote file; a not-found answer means it was deleted
    /// remotely in the meantime.
    async fn download(&self, path: &str) -> Result<()> {
        let Some((content, meta)) = self.transport.get_file(path).await? else {
            return self.delete_local(path).await;
        };

        let full_path = self.root.join(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full_path, &content)?;

        // Mirror the server's mtime so mtime comparison stays meaningful.
        let file = std::fs::File::options().write(true).open(&full_path)?;
        if let Err(err) = file.set_modified(meta.modified.into()) {
            warn!(path, %err, "failed to set file modification time");
        }

        self.update_index(path, meta.hash, meta.size, meta.modified, Source::Remote)
            .await;
        info!(path, "downloaded");
        Ok(())
    }

    async fn delete_local(&self, path: &str) -> Result<()> {
        let full_path = self.root.join(path);
        match std::fs::remove_file(&full_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        self.remove_from_index(path).await;
        info!(path, "deleted locally");
        Ok(())
    }

    async fn delete_remote(&self, path: &str) -> Result<()> {
        self.transport.delete_file(path).await?;
        self.remove_from_index(path).await;
        info!(path, "deleted remotely");
        Ok(())
    }

    async fn indexed(&self, path: &str) -> Option<FileState> {
        self.index.read().await.files.get(path).cloned()
    }

    async fn update_index(
        &self,
        path: &str,
        hash: ContentHash,
        size: u64,
        modified: chrono::DateTime<Utc>,
        source: Source,
    ) {
        let mut index = self.index.write().await;
        index.files.insert(
            path.to_string(),
            FileState {
                path: path.to_string(),
                hash,
                size,
                modified,
                source,
                synced_at: Utc::now(),
            },
        );
    }

    async fn remove_from_index(&self, path: &str) {
        self.index.write().await.files.remove(path);
    }

    /// Persist the index; failures are logged, never fatal
    async fn persist_index(&self) {
        let index = self.index.read().await;
        if let Err(err) = self.store.save(&index) {
            error!(%err, "failed to save sync index");
        }
    }
}
