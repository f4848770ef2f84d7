//! ysync-core: bidirectional workspace sync engine
//!
//! Provides local scanning, content classification, the persistent sync
//! index, the debounced filesystem watcher, and the reconciler that fuses
//! local, remote, and indexed state into per-path actions.

pub mod classify;
pub mod config;
pub mod daemon;
pub mod hash;
pub mod ignore;
pub mod index;
pub mod remote;
pub mod scan;
pub mod sync;
pub mod watch;

pub use config::Config;
pub use daemon::{Daemon, DaemonOptions};
pub use hash::ContentHash;
pub use ignore::IgnoreMatcher;
pub use index::{FileState, Index, IndexStore, Source, SYNC_DIR};
pub use remote::{RemoteFileMeta, WorkspaceListing, WorkspaceTransport};
pub use scan::{FileEntry, Scanner};
pub use sync::SyncManager;
pub use watch::{ChangeEvent, FsWatcher, Op};
