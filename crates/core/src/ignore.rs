//! Ignore patterns matched per path component
//!
//! Patterns are shell-style globs evaluated against each `/`-separated
//! component of a relative path (which covers the basename). A directory
//! that matches is skipped as a whole subtree by the scanner and watcher.

use globset::{Glob, GlobMatcher};
use tracing::debug;

/// Compiled ignore patterns.
///
/// Matching is case-sensitive. Patterns that fail to compile are skipped;
/// the matcher is advisory and never errors.
#[derive(Clone, Default)]
pub struct IgnoreMatcher {
    globs: Vec<GlobMatcher>,
}

impl IgnoreMatcher {
    /// Compile a pattern list, silently dropping invalid globs
    #[must_use]
    pub fn new(patterns: &[String]) -> Self {
        let globs = patterns
            .iter()
            .filter_map(|pattern| match Glob::new(pattern) {
                Ok(glob) => Some(glob.compile_matcher()),
                Err(err) => {
                    debug!(pattern, %err, "skipping invalid ignore pattern");
                    None
                }
            })
            .collect();

        Self { globs }
    }

    /// Whether any component of `rel_path` matches any pattern
    #[must_use]
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        rel_path
            .split('/')
            .filter(|component| !component.is_empty())
            .any(|component| self.globs.iter().any(|glob| glob.is_match(component)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> IgnoreMatcher {
        let owned: Vec<String> = patterns.iter().map(|p| (*p).to_string()).collect();
        IgnoreMatcher::new(&owned)
    }

    #[test]
    fn test_component_match() {
        let m = matcher(&[".git"]);
        assert!(m.is_ignored(".git"));
        assert!(m.is_ignored("project/.git/config"));
        assert!(!m.is_ignored("project/src/main.rs"));
    }

    #[test]
    fn test_basename_glob() {
        let m = matcher(&["*.log"]);
        assert!(m.is_ignored("build.log"));
        assert!(m.is_ignored("project/build.log"));
        assert!(!m.is_ignored("project/build.log.txt"));
    }

    #[test]
    fn test_case_sensitive() {
        let m = matcher(&["*.TMP"]);
        assert!(m.is_ignored("scratch.TMP"));
        assert!(!m.is_ignored("scratch.tmp"));
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let m = matcher(&["[", "*.swp"]);
        assert!(m.is_ignored("file.swp"));
        assert!(!m.is_ignored("file.txt"));
    }

    #[test]
    fn test_empty_patterns_match_nothing() {
        let m = matcher(&[]);
        assert!(!m.is_ignored("anything/at/all"));
    }
}
