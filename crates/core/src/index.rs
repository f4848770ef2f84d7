//! Sync index persistence
//!
//! The index remembers the last-known state of every synced file so that an
//! absence can be told apart: a path missing on one side with an index entry
//! was deleted there; a path missing with no entry has simply never been
//! seen. It lives at `{root}/.youlab-sync/index.json`, a JSON layout that
//! must stay readable across runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::hash::ContentHash;

/// Reserved subdirectory under the sync root; never scanned, watched, or
/// reconciled.
pub const SYNC_DIR: &str = ".youlab-sync";

/// Index file name within [`SYNC_DIR`]
pub const INDEX_FILE: &str = "index.json";

/// Is `rel` the reserved directory or a path inside it?
#[must_use]
pub fn in_sync_dir(rel: &str) -> bool {
    rel.strip_prefix(SYNC_DIR)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Current index schema version
pub const INDEX_VERSION: u32 = 1;

/// Which side produced the content recorded by the last sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Local,
    Remote,
    Both,
}

/// The state of one file at its last successful sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Relative path, the canonical key
    pub path: String,
    /// SHA-256 of the content
    pub hash: ContentHash,
    /// Size in bytes
    pub size: u64,
    /// Local mtime for uploads, server-reported mtime for downloads
    pub modified: DateTime<Utc>,
    pub source: Source,
    /// Wall clock when this record was written
    pub synced_at: DateTime<Utc>,
}

/// Persistent map of last-known file states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    pub user_id: String,
    pub last_sync: DateTime<Utc>,
    pub files: HashMap<String, FileState>,
}

impl Index {
    /// Create an empty index for a user
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            version: INDEX_VERSION,
            user_id: user_id.into(),
            last_sync: DateTime::UNIX_EPOCH,
            files: HashMap::new(),
        }
    }
}

/// Single-file persistence for [`Index`].
///
/// Not thread-safe by itself; the reconciler serializes all access.
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    /// Create a store rooted at the sync root, ensuring the reserved
    /// directory exists.
    ///
    /// # Errors
    /// Returns an error if the reserved directory cannot be created.
    pub fn new(root: &Path) -> Result<Self> {
        let dir = root.join(SYNC_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(INDEX_FILE),
        })
    }

    /// Load the index, or an empty one when the file is absent.
    ///
    /// A corrupt file is logged and treated as empty; the next save
    /// replaces it.
    #[must_use]
    pub fn load(&self, user_id: &str) -> Index {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Index::new(user_id);
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to read sync index");
                return Index::new(user_id);
            }
        };

        match serde_json::from_slice::<Index>(&data) {
            Ok(mut index) => {
                if index.user_id.is_empty() {
                    index.user_id = user_id.to_string();
                }
                index
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "corrupt sync index, starting empty");
                Index::new(user_id)
            }
        }
    }

    /// Write the index via a temporary file and rename, so a crash mid-save
    /// leaves the prior state intact.
    ///
    /// # Errors
    /// Returns an error if serialization or the write/rename fails.
    pub fn save(&self, index: &Index) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Path of the on-disk index file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_state(path: &str, content: &[u8]) -> FileState {
        FileState {
            path: path.to_string(),
            hash: ContentHash::of(content),
            size: content.len() as u64,
            modified: Utc::now(),
            source: Source::Local,
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn test_load_missing_returns_empty() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path()).unwrap();

        let index = store.load("user-1");
        assert_eq!(index.version, INDEX_VERSION);
        assert_eq!(index.user_id, "user-1");
        assert!(index.files.is_empty());
        assert_eq!(index.last_sync, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path()).unwrap();

        let mut index = Index::new("user-1");
        index.last_sync = Utc::now();
        index
            .files
            .insert("notes/a.md".to_string(), sample_state("notes/a.md", b"a"));

        store.save(&index).unwrap();
        let loaded = store.load("user-1");
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_corrupt_index_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path()).unwrap();
        std::fs::write(store.path(), b"{not json").unwrap();

        let index = store.load("user-1");
        assert!(index.files.is_empty());

        // next save replaces the corrupt file
        store.save(&index).unwrap();
        assert_eq!(store.load("user-1"), index);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::new(dir.path()).unwrap();
        store.save(&Index::new("user-1")).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path().join(SYNC_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![INDEX_FILE.to_string()]);
    }

    #[test]
    fn test_index_json_field_names() {
        let mut index = Index::new("user-1");
        index
            .files
            .insert("a.txt".to_string(), sample_state("a.txt", b"a"));

        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["user_id"], "user-1");
        let entry = &json["files"]["a.txt"];
        for field in ["path", "hash", "size", "modified", "source", "synced_at"] {
            assert!(entry.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(entry["source"], "local");
    }
}
