//! Parallel, cooperative directory traversal.
//!
//! Workers repeatedly call [`Walker::step`]. Each step claims one directory
//! handle off the shared cache and drains entries from it; subdirectories
//! are opened and pushed onto the cache as they are discovered, which makes
//! them immediately claimable by every worker, then recursed into for one
//! step. There is no queue and no join barrier: termination is decided by a
//! worker that, on a top-level step, finds the cache empty while nobody
//! else is inside the walker body and seeding has already happened.

pub mod cache;
pub mod handle;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub use cache::DirCache;
pub use handle::{DirEntry, DirHandle, FileMeta};

/// What a step tells the driving worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    /// Call `step` again; other workers may still produce work.
    Again,
    /// The traversal is complete for every worker.
    Done,
}

/// A regular file handed to the per-file callback. Consumed in the same
/// stack frame; nothing is queued.
pub struct FileJob<'a> {
    /// Descriptor of the containing directory, usable with `openat`.
    pub dir_fd: libc::c_int,
    pub dir: &'a Path,
    pub name: &'a OsStr,
    pub meta: FileMeta,
}

pub struct Walker {
    cache: DirCache,
    root: PathBuf,
    min_file_size: u64,
    max_depth: usize,
    inflight: AtomicUsize,
    inited: AtomicBool,
    first: AtomicBool,
    finished: AtomicBool,
}

impl Walker {
    /// A walker over `root` that skips regular files smaller than
    /// `min_file_size` before they ever reach the callback.
    pub fn new(root: impl Into<PathBuf>, min_file_size: u64) -> Self {
        Self::with_limits(root, min_file_size, usize::MAX)
    }

    /// Additionally bounds the directory recursion depth; the root is at
    /// depth zero.
    pub fn with_limits(root: impl Into<PathBuf>, min_file_size: u64, max_depth: usize) -> Self {
        Self {
            cache: DirCache::with_fd_limit(),
            root: root.into(),
            min_file_size,
            max_depth,
            inflight: AtomicUsize::new(0),
            inited: AtomicBool::new(false),
            first: AtomicBool::new(true),
            finished: AtomicBool::new(false),
        }
    }

    /// One unit of traversal work. Drive with
    /// `while walker.step(&mut visit) == WalkStatus::Again {}` from any
    /// number of threads.
    pub fn step(&self, visit: &mut dyn FnMut(FileJob<'_>)) -> WalkStatus {
        self.step_inner(false, visit)
    }

    fn step_inner(&self, recursed: bool, visit: &mut dyn FnMut(FileJob<'_>)) -> WalkStatus {
        if self.finished.load(Ordering::Acquire) {
            return WalkStatus::Done;
        }

        let dir = if !recursed && self.cache.is_empty() {
            // Top-level re-entry with no handles to pop. The run is over
            // once every worker is idle and seeding has happened: at that
            // point all directories have been read and no recursive call
            // can repopulate the cache.
            if self.inflight.load(Ordering::Acquire) == 0 && self.inited.load(Ordering::Acquire) {
                self.finished.store(true, Ordering::Release);
                debug!(root = %self.root.display(), "walk finished");
                return WalkStatus::Done;
            }
            if self
                .first
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Another worker seeds, or still holds handles in flight.
                return WalkStatus::Again;
            }
            let root = match DirHandle::open_root(&self.root) {
                Ok(h) => Arc::new(h),
                Err(e) => {
                    eprintln!("{}: {}", self.root.display(), e);
                    self.finished.store(true, Ordering::Release);
                    return WalkStatus::Done;
                }
            };
            if !self.cache.insert(Arc::clone(&root)) {
                eprintln!("{}: descriptor exceeds cache range", self.root.display());
                self.finished.store(true, Ordering::Release);
                return WalkStatus::Done;
            }
            self.inited.store(true, Ordering::Release);
            root
        } else {
            match self.cache.fetch1() {
                Some(h) => h,
                None => return WalkStatus::Again,
            }
        };

        self.inflight.fetch_add(1, Ordering::AcqRel);
        self.scan(&dir, visit);
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        WalkStatus::Again
    }

    /// Drains entries from one claimed handle. Several workers may scan the
    /// same handle at once; `next_entry` hands each entry to exactly one of
    /// them.
    fn scan(&self, dir: &Arc<DirHandle>, visit: &mut dyn FnMut(FileJob<'_>)) {
        loop {
            let Some(entry) = dir.next_entry() else {
                // End of entries: the first scanner to get here removes the
                // handle from the cache, everyone drops their reference,
                // and the last drop closes the descriptor.
                if !dir.mark_erased() {
                    self.cache.erase(dir.fd());
                }
                return;
            };
            if entry.is_dot() {
                continue;
            }
            let Ok(meta) = dir.stat_entry(&entry) else {
                continue;
            };
            if meta.is_dir() {
                if dir.depth() >= self.max_depth {
                    continue;
                }
                // Losing one subdirectory must not stop the walk.
                let Ok(child) = dir.open_child(&entry) else {
                    trace!(dir = %dir.path().display(), "skipping unreadable subdirectory");
                    continue;
                };
                let child = Arc::new(child);
                if self.cache.insert(Arc::clone(&child)) {
                    self.step_inner(true, visit);
                } else {
                    // Dropping the handle closes the descriptor.
                    warn!(dir = %child.path().display(), "descriptor exceeds cache range, subtree skipped");
                }
            } else if meta.is_regular() && meta.size >= self.min_file_size {
                visit(FileJob {
                    dir_fd: dir.fd(),
                    dir: dir.path(),
                    name: entry.os_name(),
                    meta,
                });
            }
            // symlinks and every other file type are ignored
        }
    }
}
