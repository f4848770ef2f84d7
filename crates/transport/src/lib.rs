//! ysync-transport: workspace transport implementations
//!
//! The [`WorkspaceTransport`] contract lives in the core crate next to its
//! consumer; this crate supplies the HTTP client used in production and an
//! in-memory workspace for tests.

pub mod http;
pub mod memory;

pub use http::HttpTransport;
pub use memory::MemoryWorkspace;
pub use ysync_core::remote::{RemoteFileMeta, WorkspaceListing, WorkspaceTransport};
