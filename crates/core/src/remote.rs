//! Workspace transport contract
//!
//! The reconciler drives the remote side through this trait; implementations
//! live in the transport crate (HTTP against a workspace server, plus an
//! in-memory double for tests).

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Metadata the server reports for one workspace file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileMeta {
    /// Relative path within the workspace
    pub path: String,
    /// SHA-256 hex digest of the content
    pub hash: ContentHash,
    /// Content size in bytes
    pub size: u64,
    /// Server-reported modification time
    pub modified: DateTime<Utc>,
}

/// Snapshot of a user's workspace as reported by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceListing {
    pub user_id: String,
    pub files: HashMap<String, RemoteFileMeta>,
}

/// Typed operations against the workspace server.
///
/// Implementations apply their own per-request timeout. There is no retry
/// policy here: a failed call surfaces to the reconciler as a per-file error
/// and the path is retried on the next pass.
#[async_trait]
pub trait WorkspaceTransport: Send + Sync {
    /// Reachability check, used only for operator-visible status
    async fn ping(&self) -> Result<()>;

    /// List all files in the workspace
    async fn list_files(&self) -> Result<WorkspaceListing>;

    /// Fetch one file. `None` means the file no longer exists remotely.
    async fn get_file(&self, path: &str) -> Result<Option<(Bytes, RemoteFileMeta)>>;

    /// Create or update one file, returning the metadata the server accepted
    async fn put_file(&self, path: &str, content: Bytes) -> Result<RemoteFileMeta>;

    /// Delete one file. Deleting an absent file is not an error.
    async fn delete_file(&self, path: &str) -> Result<()>;
}
