//! Repository tree filtering before any file is fetched.
//!
//! Drops noise directories, unsupported extensions, oversized files and
//! custom glob matches, then caps what is left so build cost stays bounded.

use std::fmt;

use cartograph_core::BuildConfig;

use crate::parser::Language;
use crate::provider::{EntryType, TreeEntry};

/// Decides which tree entries are worth fetching and parsing.
///
/// # Examples
///
/// ```
/// use cartograph_core::BuildConfig;
/// use cartograph_graph::filter::TreeFilter;
///
/// let filter = TreeFilter::from_config(&BuildConfig::default());
/// assert!(filter.should_skip("node_modules/react/index.js", 10));
/// assert!(filter.should_skip("README.md", 10));
/// assert!(!filter.should_skip("src/app.ts", 10));
/// ```
pub struct TreeFilter {
    noise_dirs: Vec<String>,
    skip_patterns: Vec<glob::Pattern>,
    max_file_size: u64,
    max_files: usize,
}

impl TreeFilter {
    /// Create a filter from build configuration. Invalid glob patterns are ignored.
    pub fn from_config(config: &BuildConfig) -> Self {
        let mut skip_patterns = Vec::new();
        for pat in &config.skip_patterns {
            match glob::Pattern::new(pat) {
                Ok(p) => skip_patterns.push(p),
                Err(e) => tracing::warn!(pattern = %pat, error = %e, "ignoring invalid skip pattern"),
            }
        }

        Self {
            noise_dirs: config.noise_dirs.clone(),
            skip_patterns,
            max_file_size: config.max_file_size,
            max_files: config.max_files,
        }
    }

    /// Check if a single path of the given size should be skipped.
    pub fn should_skip(&self, path: &str, size: u64) -> bool {
        self.check_skip(path, Some(size)).is_some()
    }

    /// Filter a tree listing down to parseable blobs.
    ///
    /// Kept entries are sorted by path so the same tree always yields the
    /// same file set, and truncated to `max_files`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cartograph_core::BuildConfig;
    /// use cartograph_graph::filter::TreeFilter;
    /// use cartograph_graph::provider::TreeEntry;
    ///
    /// let tree = vec![
    ///     TreeEntry::blob("src/b.ts", 100),
    ///     TreeEntry::blob("dist/bundle.js", 100),
    ///     TreeEntry::blob("src/a.py", 100),
    /// ];
    /// let result = TreeFilter::from_config(&BuildConfig::default()).filter(tree);
    /// let kept: Vec<_> = result.kept.iter().map(|e| e.path.as_str()).collect();
    /// assert_eq!(kept, vec!["src/a.py", "src/b.ts"]);
    /// assert_eq!(result.skipped.len(), 1);
    /// ```
    pub fn filter(&self, entries: Vec<TreeEntry>) -> FilterResult {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();

        for entry in entries {
            if entry.entry_type != EntryType::Blob {
                continue;
            }
            match self.check_skip(&entry.path, entry.size) {
                Some(reason) => skipped.push(SkippedFile {
                    path: entry.path,
                    reason,
                }),
                None => kept.push(entry),
            }
        }

        kept.sort_by(|a, b| a.path.cmp(&b.path));
        if kept.len() > self.max_files {
            for entry in kept.split_off(self.max_files) {
                skipped.push(SkippedFile {
                    path: entry.path,
                    reason: SkipReason::FileLimit,
                });
            }
        }

        FilterResult { kept, skipped }
    }

    fn check_skip(&self, path: &str, size: Option<u64>) -> Option<SkipReason> {
        let mut segments: Vec<&str> = path.split('/').collect();
        segments.pop();
        if let Some(dir) = segments
            .iter()
            .find(|s| self.noise_dirs.iter().any(|d| d == *s))
        {
            return Some(SkipReason::NoiseDirectory(dir.to_string()));
        }

        if Language::from_path(path).is_none() {
            return Some(SkipReason::UnsupportedLanguage);
        }

        if let Some(size) = size {
            if size > self.max_file_size {
                return Some(SkipReason::TooLarge(size));
            }
        }

        self.skip_patterns
            .iter()
            .find(|p| p.matches(path))
            .map(|p| SkipReason::PatternMatch(p.to_string()))
    }
}

/// Result of filtering a tree listing.
#[derive(Debug)]
pub struct FilterResult {
    /// Entries to fetch, sorted by path.
    pub kept: Vec<TreeEntry>,
    /// Entries that were dropped, with reasons.
    pub skipped: Vec<SkippedFile>,
}

/// A path that was excluded from the build.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

/// Why a path was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Inside a configured noise directory.
    NoiseDirectory(String),
    /// Extension has no parser.
    UnsupportedLanguage,
    /// Larger than `max_file_size` bytes.
    TooLarge(u64),
    /// Matched a custom skip pattern.
    PatternMatch(String),
    /// Beyond the `max_files` cap.
    FileLimit,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoiseDirectory(dir) => write!(f, "noise directory: {dir}"),
            SkipReason::UnsupportedLanguage => write!(f, "unsupported language"),
            SkipReason::TooLarge(size) => write!(f, "too large ({size} bytes)"),
            SkipReason::PatternMatch(pat) => write!(f, "pattern: {pat}"),
            SkipReason::FileLimit => write!(f, "file limit reached"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_with(config: BuildConfig) -> TreeFilter {
        TreeFilter::from_config(&config)
    }

    #[test]
    fn skips_nested_noise_directories() {
        let filter = filter_with(BuildConfig::default());
        assert!(filter.should_skip("packages/web/node_modules/x/index.ts", 1));
        assert!(filter.should_skip("app/__pycache__/mod.py", 1));
        // A file merely named like a noise dir is fine.
        assert!(!filter.should_skip("src/build.ts", 1));
    }

    #[test]
    fn skips_oversized_files() {
        let filter = filter_with(BuildConfig::default());
        assert!(!filter.should_skip("src/a.ts", 51_200));
        assert!(filter.should_skip("src/a.ts", 51_201));
    }

    #[test]
    fn custom_patterns_apply() {
        let config = BuildConfig {
            skip_patterns: vec!["**/*.test.ts".into(), "[".into()],
            ..BuildConfig::default()
        };
        let filter = filter_with(config);
        assert!(filter.should_skip("src/auth/login.test.ts", 1));
        assert!(!filter.should_skip("src/auth/login.ts", 1));
    }

    #[test]
    fn caps_file_count_deterministically() {
        let config = BuildConfig {
            max_files: 2,
            ..BuildConfig::default()
        };
        let tree = vec![
            TreeEntry::blob("c.ts", 1),
            TreeEntry::blob("a.ts", 1),
            TreeEntry::blob("b.ts", 1),
        ];
        let result = filter_with(config).filter(tree);
        let kept: Vec<_> = result.kept.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(kept, vec!["a.ts", "b.ts"]);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].path, "c.ts");
        assert_eq!(result.skipped[0].reason, SkipReason::FileLimit);
    }

    #[test]
    fn directories_are_ignored() {
        let tree = vec![TreeEntry {
            path: "src".into(),
            entry_type: EntryType::Tree,
            size: None,
        }];
        let result = filter_with(BuildConfig::default()).filter(tree);
        assert!(result.kept.is_empty());
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(SkipReason::TooLarge(10).to_string(), "too large (10 bytes)");
        assert_eq!(
            SkipReason::NoiseDirectory("dist".into()).to_string(),
            "noise directory: dist"
        );
    }
}
