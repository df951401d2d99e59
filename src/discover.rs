//! Candidate file discovery for a watch target.
//!
//! A folder target is walked with `walkdir` (one level deep unless
//! `recursive`), skipping anything that matches the configured exclude
//! globs. Files are kept when their extension is in the target's allow-list
//! (or every supported extension when the allow-list is empty) and the
//! extractor can handle it. A file target yields its own path unfiltered.
//!
//! Two walking modes share the filters:
//! - [`FileFilter::enumerate`] is strict about the root: a missing or
//!   unreadable target path is an error. Entries below the root that cannot
//!   be read are skipped with a warning.
//! - [`FileFilter::latest_modification`] never fails; it is used by the
//!   change detector, which must not abort because of one bad entry.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IndexingConfig;
use crate::error::{IndexError, Result};
use crate::models::{TargetKind, WatchTarget};
use crate::registry::normalize_extensions;

#[derive(Clone)]
pub struct FileFilter {
    supported: Vec<String>,
    excludes: GlobSet,
    follow_symlinks: bool,
}

impl FileFilter {
    pub fn new(config: &IndexingConfig) -> Result<Self> {
        Ok(Self {
            supported: normalize_extensions(&config.supported_extensions),
            excludes: build_globset(&config.exclude_globs)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Drop supported extensions for which `keep` is false.
    pub fn restrict(mut self, keep: impl Fn(&str) -> bool) -> Self {
        self.supported.retain(|ext| keep(ext));
        self
    }

    /// Target allow-list intersected with the supported set.
    pub fn allowed_extensions(&self, target: &WatchTarget) -> Vec<String> {
        if target.file_types.is_empty() {
            return self.supported.clone();
        }
        target
            .file_types
            .iter()
            .filter(|ext| self.supported.contains(ext))
            .cloned()
            .collect()
    }

    /// Candidate files for an indexing run, in a stable order.
    pub fn enumerate(&self, target: &WatchTarget) -> Result<Vec<PathBuf>> {
        let root = std::fs::metadata(&target.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IndexError::PathNotFound(target.path_str()),
            _ => IndexError::Io(e),
        })?;

        if target.kind == TargetKind::File {
            if !root.is_file() {
                return Err(IndexError::InvalidInput(format!(
                    "{} is no longer a file",
                    target.path.display()
                )));
            }
            return Ok(vec![target.path.clone()]);
        }
        if !root.is_dir() {
            return Err(IndexError::InvalidInput(format!(
                "{} is no longer a folder",
                target.path.display()
            )));
        }

        let allowed = self.allowed_extensions(target);
        let mut files = Vec::new();
        for entry in self.walker(target) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => {
                    return Err(match e.into_io_error() {
                        Some(io) => IndexError::Io(io),
                        None => IndexError::InvalidInput("filesystem loop at target root".into()),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if self.accepts(&target.path, entry.path(), entry.file_type().is_file(), &allowed) {
                files.push(entry.into_path());
            }
        }

        debug!(target = %target.id, count = files.len(), "enumerated candidates");
        Ok(files)
    }

    /// Newest modification time among the target's candidate files, or
    /// `None` when there are none. Errors are swallowed per entry.
    pub fn latest_modification(&self, target: &WatchTarget) -> Option<DateTime<Utc>> {
        if target.kind == TargetKind::File {
            return modified_at(&target.path);
        }

        let allowed = self.allowed_extensions(target);
        let mut latest: Option<DateTime<Utc>> = None;
        for entry in self.walker(target) {
            let Ok(entry) = entry else {
                continue;
            };
            if !self.accepts(&target.path, entry.path(), entry.file_type().is_file(), &allowed) {
                continue;
            }
            let Some(ts) = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
            else {
                continue;
            };
            if latest.map_or(true, |l| ts > l) {
                latest = Some(ts);
            }
        }
        latest
    }

    fn walker(&self, target: &WatchTarget) -> walkdir::IntoIter {
        let mut walker = WalkDir::new(&target.path)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name();
        if !target.recursive {
            walker = walker.max_depth(1);
        }
        walker.into_iter()
    }

    fn accepts(&self, root: &Path, path: &Path, is_file: bool, allowed: &[String]) -> bool {
        if !is_file {
            return false;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        if self.excludes.is_match(relative) {
            return false;
        }
        match extension_of(path) {
            Some(ext) => allowed.contains(&ext),
            None => false,
        }
    }
}

/// Lowercase extension with a leading dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            IndexError::InvalidConfig(format!("bad exclude glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn target(path: &Path, kind: TargetKind, recursive: bool, file_types: &[&str]) -> WatchTarget {
        WatchTarget {
            id: "t1".to_string(),
            path: path.to_path_buf(),
            name: "t1".to_string(),
            kind,
            recursive,
            file_types: file_types.iter().map(|s| s.to_string()).collect(),
            tags: Vec::new(),
            enabled: true,
            reindex_on_change: true,
            last_indexed_at: None,
            next_scheduled_at: None,
            file_count: 0,
            created_at: Utc::now(),
        }
    }

    fn tree() -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        fs::write(tmp.path().join("b.md"), "beta").unwrap();
        fs::write(tmp.path().join("c.bin"), "gamma").unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/d.TXT"), "delta").unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        fs::write(tmp.path().join("node_modules/pkg/e.txt"), "skip").unwrap();
        tmp
    }

    fn names(files: &[PathBuf], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn test_recursive_walk_filters_and_excludes() {
        let tmp = tree();
        let filter = FileFilter::new(&IndexingConfig::default()).unwrap();
        let files = filter
            .enumerate(&target(tmp.path(), TargetKind::Folder, true, &[".txt"]))
            .unwrap();
        assert_eq!(names(&files, tmp.path()), vec!["a.txt", "sub/d.TXT"]);
    }

    #[test]
    fn test_non_recursive_walk() {
        let tmp = tree();
        let filter = FileFilter::new(&IndexingConfig::default()).unwrap();
        let files = filter
            .enumerate(&target(tmp.path(), TargetKind::Folder, false, &[]))
            .unwrap();
        assert_eq!(names(&files, tmp.path()), vec!["a.txt", "b.md"]);
    }

    #[test]
    fn test_allow_list_intersects_supported() {
        let tmp = tree();
        let filter = FileFilter::new(&IndexingConfig::default()).unwrap();
        let t = target(tmp.path(), TargetKind::Folder, true, &[".bin", ".md"]);
        assert_eq!(filter.allowed_extensions(&t), vec![".md"]);
        assert_eq!(names(&filter.enumerate(&t).unwrap(), tmp.path()), vec!["b.md"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let tmp = tree();
        let gone = tmp.path().join("gone");
        let filter = FileFilter::new(&IndexingConfig::default()).unwrap();
        let err = filter
            .enumerate(&target(&gone, TargetKind::Folder, true, &[]))
            .unwrap_err();
        assert!(matches!(err, IndexError::PathNotFound(_)));
        assert!(filter
            .latest_modification(&target(&gone, TargetKind::Folder, true, &[]))
            .is_none());
    }

    #[test]
    fn test_file_target_yields_itself() {
        let tmp = tree();
        let file = tmp.path().join("c.bin");
        let filter = FileFilter::new(&IndexingConfig::default()).unwrap();
        let t = target(&file, TargetKind::File, false, &[]);
        assert_eq!(filter.enumerate(&t).unwrap(), vec![file]);
        assert!(filter.latest_modification(&t).is_some());
    }

    #[test]
    fn test_no_matching_files_has_no_mtime() {
        let tmp = tree();
        let filter = FileFilter::new(&IndexingConfig::default()).unwrap();
        let t = target(tmp.path(), TargetKind::Folder, true, &[".pdf"]);
        assert!(filter.latest_modification(&t).is_none());
    }

    #[test]
    fn test_bad_glob_rejected() {
        let config = IndexingConfig {
            exclude_globs: vec!["a[".to_string()],
            ..IndexingConfig::default()
        };
        assert!(matches!(
            FileFilter::new(&config),
            Err(IndexError::InvalidConfig(_))
        ));
    }
}
