use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::CatalogConfig;

/// A file in the tracked tree recognized as an image. Discovered fresh on
/// every scan and never persisted.
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Resolved absolute path.
    pub path: PathBuf,
    /// Path relative to the scan root.
    pub relative: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Device and inode pair, when the platform provides one.
    pub file_id: Option<(u64, u64)>,
}

pub struct Scanner {
    config: CatalogConfig,
}

impl Scanner {
    pub fn new(config: CatalogConfig) -> Self {
        Self { config }
    }

    /// Walk the source tree and produce a duplicate-free inventory, sorted by
    /// lower-cased resolved path. Unreadable subtrees are skipped, never fatal.
    pub fn scan(&self) -> Vec<SourceImage> {
        let root = self
            .config
            .source_directory
            .canonicalize()
            .unwrap_or_else(|_| self.config.source_directory.clone());

        let ignore_dirs: HashSet<String> = self
            .config
            .ignore_directories
            .iter()
            .map(|d| d.to_lowercase())
            .collect();

        let mut seen_paths: HashSet<String> = HashSet::new();
        let mut seen_ids: HashSet<(u64, u64)> = HashSet::new();
        let mut images = Vec::new();

        let walker = WalkDir::new(&root).follow_links(true).into_iter();
        for entry in walker.filter_entry(|e| {
            // Prune excluded directories before descending so generated
            // caches never end up in their own inventory.
            if e.file_type().is_dir() && e.depth() > 0 {
                let name = e.file_name().to_string_lossy().to_lowercase();
                return !ignore_dirs.contains(&name);
            }
            true
        }) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry during scan: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if !self.is_image(&name) || self.is_ignored_name(&name) {
                continue;
            }

            let resolved = match entry.path().canonicalize() {
                Ok(p) => p,
                Err(_) => entry.path().to_path_buf(),
            };

            let metadata = match std::fs::metadata(&resolved) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {}: {}", resolved.display(), e);
                    continue;
                }
            };

            // Two independent dedup signals. The inode pair is best-effort;
            // its absence never blocks inclusion.
            let key = resolved.to_string_lossy().to_lowercase();
            if !seen_paths.insert(key) {
                continue;
            }
            let file_id = file_identity(&metadata);
            if let Some(id) = file_id
                && !seen_ids.insert(id)
            {
                continue;
            }

            let relative = resolved
                .strip_prefix(&root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(&name));

            images.push(SourceImage {
                path: resolved,
                relative,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                file_id,
            });
        }

        images.sort_by_key(|img| img.path.to_string_lossy().to_lowercase());

        debug!("Scan of {:?} found {} images", root, images.len());
        images
    }

    pub(crate) fn is_image(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.config
            .extensions
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    }

    fn is_ignored_name(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.config
            .ignore_globs
            .iter()
            .any(|pattern| glob_match(&pattern.to_lowercase(), &lower))
    }
}

#[cfg(unix)]
pub(crate) fn file_identity(metadata: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
pub(crate) fn file_identity(_metadata: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

/// Minimal shell-style matcher: `*` matches any run, `?` a single character.
/// Both inputs are expected to be lower-cased already.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some('?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) if pc == nc => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    matches(&p, &n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> CatalogConfig {
        CatalogConfig {
            source_directory: root.to_path_buf(),
            ignore_directories: vec![".cache".to_string(), "cache".to_string()],
            ignore_globs: vec!["thumb*".to_string(), "*_preview.*".to_string()],
            extensions: vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"not really an image").unwrap();
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("thumb*", "thumb.jpg"));
        assert!(glob_match("thumb*", "thumbnail_01.png"));
        assert!(!glob_match("thumb*", "my_thumb.jpg"));
        assert!(glob_match("*_preview.*", "img_preview.jpg"));
        assert!(!glob_match("*_preview.*", "preview.jpg"));
        assert!(glob_match("img_????.jpg", "img_0042.jpg"));
        assert!(!glob_match("img_????.jpg", "img_42.jpg"));
    }

    #[test]
    fn test_scan_applies_ignore_rules() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        touch(&root.join("a.jpg"));
        touch(&root.join("sub/b.png"));
        touch(&root.join("sub/c.JPEG"));
        // Excluded by glob despite a valid extension.
        touch(&root.join("sub/thumb.jpg"));
        // Excluded directory, contents never traversed.
        touch(&root.join(".cache/d.jpg"));
        // Not an image extension.
        touch(&root.join("notes.txt"));

        let scanner = Scanner::new(test_config(root));
        let images = scanner.scan();

        let names: Vec<String> = images
            .iter()
            .map(|i| i.relative.to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "sub/b.png", "sub/c.JPEG"]);
    }

    #[test]
    fn test_scan_sorted_case_insensitively() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        touch(&root.join("Beta.jpg"));
        touch(&root.join("alpha.jpg"));
        touch(&root.join("GAMMA.jpg"));

        let scanner = Scanner::new(test_config(root));
        let images = scanner.scan();

        let names: Vec<&str> = images
            .iter()
            .map(|i| i.relative.to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["alpha.jpg", "Beta.jpg", "GAMMA.jpg"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_dedups_hard_links() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        touch(&root.join("original.jpg"));
        std::fs::hard_link(root.join("original.jpg"), root.join("alias.jpg")).unwrap();

        let scanner = Scanner::new(test_config(root));
        let images = scanner.scan();

        assert_eq!(images.len(), 1, "hard link aliases should collapse to one");
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_dedups_symlinks() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        touch(&root.join("original.jpg"));
        std::os::unix::fs::symlink(root.join("original.jpg"), root.join("link.jpg")).unwrap();

        let scanner = Scanner::new(test_config(root));
        let images = scanner.scan();

        assert_eq!(images.len(), 1, "symlink aliases should collapse to one");
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp.path().join("does-not-exist"));
        let scanner = Scanner::new(config);
        assert!(scanner.scan().is_empty());
    }
}
