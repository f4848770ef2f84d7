//! In-memory workspace for tests
//!
//! Simulates the server side of the transport contract in-process and
//! counts mutating calls, so reconciler tests can assert not just on final
//! state but on which remote operations were issued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{bail, Result};

use ysync_core::remote::{RemoteFileMeta, WorkspaceListing, WorkspaceTransport};
use ysync_core::ContentHash;

#[derive(Default)]
struct Counters {
    lists: AtomicU32,
    gets: AtomicU32,
    puts: AtomicU32,
    deletes: AtomicU32,
    active_lists: AtomicU32,
    max_active_lists: AtomicU32,
}

/// An in-process workspace server
pub struct MemoryWorkspace {
    user_id: String,
    files: Mutex<HashMap<String, (Bytes, RemoteFileMeta)>>,
    counters: Counters,
    offline: AtomicBool,
    list_delay: Mutex<Duration>,
}

impl MemoryWorkspace {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            files: Mutex::new(HashMap::new()),
            counters: Counters::default(),
            offline: AtomicBool::new(false),
            list_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Seed a remote file with an explicit mtime
    pub fn insert(&self, path: &str, content: &[u8], modified: DateTime<Utc>) {
        let meta = RemoteFileMeta {
            path: path.to_string(),
            hash: ContentHash::of(content),
            size: content.len() as u64,
            modified,
        };
        self.files
            .lock()
            .expect("workspace poisoned")
            .insert(path.to_string(), (Bytes::copy_from_slice(content), meta));
    }

    /// Remove a remote file out-of-band, as the server side would
    pub fn remove(&self, path: &str) {
        self.files.lock().expect("workspace poisoned").remove(path);
    }

    /// Current remote contents by path
    #[must_use]
    pub fn contents(&self) -> HashMap<String, Bytes> {
        self.files
            .lock()
            .expect("workspace poisoned")
            .iter()
            .map(|(path, (content, _))| (path.clone(), content.clone()))
            .collect()
    }

    /// Metadata for one remote file
    #[must_use]
    pub fn meta(&self, path: &str) -> Option<RemoteFileMeta> {
        self.files
            .lock()
            .expect("workspace poisoned")
            .get(path)
            .map(|(_, meta)| meta.clone())
    }

    /// Simulate the server being unreachable
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make `list_files` take this long, to exercise overlap handling
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().expect("workspace poisoned") = delay;
    }

    #[must_use]
    pub fn put_count(&self) -> u32 {
        self.counters.puts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn delete_count(&self) -> u32 {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn list_count(&self) -> u32 {
        self.counters.lists.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn get_count(&self) -> u32 {
        self.counters.gets.load(Ordering::SeqCst)
    }

    /// Highest number of `list_files` calls ever in flight at once
    #[must_use]
    pub fn max_concurrent_lists(&self) -> u32 {
        self.counters.max_active_lists.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceTransport for MemoryWorkspace {
    async fn ping(&self) -> Result<()> {
        self.check_online()
    }

    async fn list_files(&self) -> Result<WorkspaceListing> {
        self.check_online()?;
        self.counters.lists.fetch_add(1, Ordering::SeqCst);

        let active = self.counters.active_lists.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_active_lists
            .fetch_max(active, Ordering::SeqCst);

        let delay = *self.list_delay.lock().expect("workspace poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let files = self
            .files
            .lock()
            .expect("workspace poisoned")
            .iter()
            .map(|(path, (_, meta))| (path.clone(), meta.clone()))
            .collect();

        self.counters.active_lists.fetch_sub(1, Ordering::SeqCst);
        Ok(WorkspaceListing {
            user_id: self.user_id.clone(),
            files,
        })
    }

    async fn get_file(&self, path: &str) -> Result<Option<(Bytes, RemoteFileMeta)>> {
        self.check_online()?;
        self.counters.gets.fetch_add(1, Ordering::SeqCst);

        Ok(self
            .files
            .lock()
            .expect("workspace poisoned")
            .get(path)
            .cloned())
    }

    async fn put_file(&self, path: &str, content: Bytes) -> Result<RemoteFileMeta> {
        self.check_online()?;
        self.counters.puts.fetch_add(1, Ordering::SeqCst);

        let meta = RemoteFileMeta {
            path: path.to_string(),
            hash: ContentHash::of(&content),
            size: content.len() as u64,
            modified: Utc::now(),
        };
        self.files
            .lock()
            .expect("workspace poisoned")
            .insert(path.to_string(), (content, meta.clone()));
        Ok(meta)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.check_online()?;
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);

        // Deleting an absent file is fine, matching the server contract.
        self.files.lock().expect("workspace poisoned").remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip() {
        let workspace = MemoryWorkspace::new("user-1");

        let meta = workspace
            .put_file("a.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(meta.hash, ContentHash::of(b"hello"));
        assert_eq!(meta.size, 5);

        let (content, fetched) = workspace.get_file("a.txt").await.unwrap().unwrap();
        assert_eq!(&content[..], b"hello");
        assert_eq!(fetched, meta);

        let listing = workspace.list_files().await.unwrap();
        assert_eq!(listing.user_id, "user-1");
        assert_eq!(listing.files.len(), 1);

        workspace.delete_file("a.txt").await.unwrap();
        assert!(workspace.get_file("a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counters() {
        let workspace = MemoryWorkspace::new("user-1");
        workspace
            .put_file("a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        workspace.delete_file("a.txt").await.unwrap();
        workspace.delete_file("a.txt").await.unwrap(); // absent is ok
        workspace.list_files().await.unwrap();

        assert_eq!(workspace.put_count(), 1);
        assert_eq!(workspace.delete_count(), 2);
        assert_eq!(workspace.list_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_errors() {
        let workspace = MemoryWorkspace::new("user-1");
        workspace.set_offline(true);
        assert!(workspace.ping().await.is_err());
        assert!(workspace.list_files().await.is_err());

        workspace.set_offline(false);
        assert!(workspace.ping().await.is_ok());
    }
}
