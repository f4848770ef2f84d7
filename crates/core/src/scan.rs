//! Local tree scanning
//!
//! Walks the sync root and produces per-file observations keyed by relative
//! path. The reserved sync directory and ignored subtrees are never entered,
//! and binary-classified files are dropped at the source.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tracing::warn;

use crate::classify::is_binary;
use crate::hash::ContentHash;
use crate::ignore::IgnoreMatcher;
use crate::index::in_sync_dir;

/// One observed local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// `/`-separated path relative to the scan root
    pub path: String,
    /// SHA-256 of the content
    pub hash: ContentHash,
    /// Size in bytes
    pub size: u64,
    /// Local modification time
    pub modified: DateTime<Utc>,
}

/// Scanner for the local sync root
pub struct Scanner {
    root: PathBuf,
    matcher: IgnoreMatcher,
}

impl Scanner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, matcher: IgnoreMatcher) -> Self {
        Self {
            root: root.into(),
            matcher,
        }
    }

    /// Walk the root and return all text files keyed by relative path.
    ///
    /// Individual unreadable files are logged and skipped; so are
    /// directories whose listing fails.
    ///
    /// # Errors
    /// Returns an error only if the root itself cannot be read.
    pub fn scan(&self) -> Result<HashMap<String, FileEntry>> {
        let mut files = HashMap::new();
        self.walk(&self.root, &mut files, true)?;
        Ok(files)
    }

    fn walk(&self, dir: &Path, files: &mut HashMap<String, FileEntry>, is_root: bool) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if is_root => return Err(err.into()),
            Err(err) => {
                warn!(dir = %dir.display(), %err, "skipping unreadable directory");
                return Ok(());
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(dir = %dir.display(), %err, "skipping unreadable entry");
                    continue;
                }
            };

            let path = entry.path();
            let Some(rel) = rel_path(&self.root, &path) else {
                continue;
            };

            if in_sync_dir(&rel) {
                continue;
            }
            if self.matcher.is_ignored(&rel) {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unstattable entry");
                    continue;
                }
            };

            if file_type.is_dir() {
                self.walk(&path, files, false)?;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            match self.read_entry(&path, &rel) {
                Ok(Some(file_entry)) => {
                    files.insert(rel, file_entry);
                }
                Ok(None) => {} // binary
                Err(err) => warn!(path = rel, %err, "skipping unreadable file"),
            }
        }

        Ok(())
    }

    fn read_entry(&self, path: &Path, rel: &str) -> Result<Option<FileEntry>> {
        let content = std::fs::read(path)?;
        if is_binary(&content) {
            return Ok(None);
        }

        let metadata = std::fs::metadata(path)?;
        Ok(Some(FileEntry {
            path: rel.to_string(),
            hash: ContentHash::of(&content),
            size: metadata.len(),
            modified: metadata.modified()?.into(),
        }))
    }
}

/// Relative path with `/` separators, or `None` for paths outside the root
#[must_use]
pub fn rel_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scan(dir: &TempDir, patterns: &[&str]) -> HashMap<String, FileEntry> {
        let owned: Vec<String> = patterns.iter().map(|p| (*p).to_string()).collect();
        Scanner::new(dir.path(), IgnoreMatcher::new(&owned))
            .scan()
            .unwrap()
    }

    #[test]
    fn test_scan_simple_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "hello").unwrap();
        fs::write(dir.path().join("file2.txt"), "world").unwrap();

        let files = scan(&dir, &[]);
        assert_eq!(files.len(), 2);
        assert_eq!(files["file1.txt"].hash, ContentHash::of(b"hello"));
        assert_eq!(files["file1.txt"].size, 5);
    }

    #[test]
    fn test_scan_nested_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/deep")).unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();
        fs::write(dir.path().join("sub/deep/leaf.txt"), "leaf").unwrap();

        let files = scan(&dir, &[]);
        assert_eq!(files.len(), 3);
        assert!(files.contains_key("sub/deep/leaf.txt"));
    }

    #[test]
    fn test_scan_skips_ignored_subtree() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/config"), "cfg").unwrap();
        fs::write(dir.path().join(".git/objects/aa"), "obj").unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();
        fs::write(dir.path().join("build.log"), "log").unwrap();

        let files = scan(&dir, &[".git", "*.log"]);
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("keep.txt"));
    }

    #[test]
    fn test_scan_skips_reserved_directory() {
        use crate::index::SYNC_DIR;

        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(SYNC_DIR)).unwrap();
        fs::write(dir.path().join(SYNC_DIR).join("index.json"), "{}").unwrap();
        fs::write(dir.path().join("real.txt"), "real").unwrap();

        let files = scan(&dir, &[]);
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("real.txt"));
    }

    #[test]
    fn test_scan_skips_binary_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("text.md"), "# notes").unwrap();
        fs::write(dir.path().join("blob.bin"), b"\x00\x01\x02binary").unwrap();

        let files = scan(&dir, &[]);
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("text.md"));
    }

    #[test]
    fn test_scan_includes_empty_files() {
        // Empty files are observed by the scanner; the reconciler skips
        // them at upload time.
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();

        let files = scan(&dir, &[]);
        assert_eq!(files["empty.txt"].size, 0);
    }

    #[test]
    fn test_rel_path_uses_forward_slashes() {
        let root = Path::new("/tmp/root");
        let rel = rel_path(root, &root.join("a").join("b.txt")).unwrap();
        assert_eq!(rel, "a/b.txt");
        assert!(rel_path(root, Path::new("/elsewhere/x")).is_none());
    }
}
