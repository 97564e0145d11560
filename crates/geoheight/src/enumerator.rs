//! Discovery of candidate cell files under a connection path.

use crate::Result;
use std::collections::HashSet;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Callback receiving each discovered file.
pub type FileVisitor<'a> = &'a (dyn Fn(PathBuf) + Send + Sync);

/// Reports every candidate file under a root path.
///
/// The visitor may be called from a thread other than the caller's, one
/// file at a time. `enumerate` returns once every file has been reported.
pub trait FileEnumerator: Send + Sync + Debug {
    /// Walk `root`, calling `visit` once per file.
    fn enumerate(&self, root: &Path, visit: FileVisitor<'_>) -> Result<()>;
}

/// Recursive walk of a directory tree with `std::fs::read_dir`.
///
/// A root that is a plain file is reported as the only candidate. Entries
/// are visited in sorted order so catalogs are reproducible. Symlinked
/// directories are not followed and each backing file is reported once.
/// Only an unreadable root is an error; unreadable entries below it are
/// logged and skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryEnumerator {
    /// Maximum directory depth below the root, `None` for unlimited.
    pub max_depth: Option<usize>,
}

impl DirectoryEnumerator {
    fn walk(
        &self,
        dir: &Path,
        depth: usize,
        seen: &mut HashSet<PathBuf>,
        visit: FileVisitor<'_>,
    ) -> Result<()> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "skipping unreadable directory entry");
                    None
                }
            })
            .collect();
        entries.sort();

        for path in entries {
            let file_type = match std::fs::symlink_metadata(&path) {
                Ok(metadata) => metadata.file_type(),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };

            if file_type.is_symlink() && path.is_dir() {
                debug!(path = %path.display(), "not following symlinked directory");
                continue;
            }

            if file_type.is_dir() {
                if self.max_depth.map_or(true, |max| depth < max) {
                    if let Err(err) = self.walk(&path, depth + 1, seen, visit) {
                        warn!(path = %path.display(), error = %err, "skipping unreadable directory");
                    }
                }
                continue;
            }

            match path.canonicalize() {
                Ok(canonical) => {
                    if seen.insert(canonical) {
                        visit(path);
                    } else {
                        debug!(path = %path.display(), "file already reported under another path");
                    }
                }
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unresolvable file"),
            }
        }
        Ok(())
    }
}

impl FileEnumerator for DirectoryEnumerator {
    fn enumerate(&self, root: &Path, visit: FileVisitor<'_>) -> Result<()> {
        if root.is_file() {
            visit(root.to_path_buf());
            return Ok(());
        }
        self.walk(root, 0, &mut HashSet::new(), visit)
    }
}

/// Runs another enumerator on a worker thread and waits for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackgroundEnumerator<E> {
    inner: E,
}

impl<E: FileEnumerator> BackgroundEnumerator<E> {
    /// Wrap an enumerator.
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

impl<E: FileEnumerator> FileEnumerator for BackgroundEnumerator<E> {
    fn enumerate(&self, root: &Path, visit: FileVisitor<'_>) -> Result<()> {
        std::thread::scope(|scope| {
            let worker = scope.spawn(|| self.inner.enumerate(root, visit));
            match worker.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }
}
