//! Tracking registry: the authoritative set of files under tail.
//!
//! Every path has at most one entry. [`Registry::admit`] and
//! [`Registry::retire`] run under one lock, so the periodic scan and the
//! push-mode watch can race on the same new file and still spawn a single
//! reader. Each admission gets a generation number; a worker only ever
//! retires or updates the entry it was admitted with, never a later
//! re-admission of the same path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use loggy_core::source_name;

use crate::file_id::FileId;

/// Lifecycle of a tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailState {
    /// Admitted; the file has not been opened yet.
    Starting,
    Tailing,
    /// Last stat/open/read failed; retried on the normal cadence.
    Stalled(String),
    /// The path is gone. Terminal.
    Retired,
}

impl TailState {
    pub fn is_stalled(&self) -> bool {
        matches!(self, TailState::Stalled(_))
    }
}

/// Registry view of one tailed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub source_name: String,
    /// Offset of the next unread byte.
    pub cursor: u64,
    pub file_id: Option<FileId>,
    pub state: TailState,
}

/// Everything a worker needs to run for an admitted path.
#[derive(Debug, Clone)]
pub struct Lease {
    pub path: PathBuf,
    pub source_name: String,
    pub generation: u64,
    /// Cancelled when the entry is retired.
    pub cancel: CancellationToken,
    /// Signalled when the watch backend reports a change to the path.
    pub wake: Arc<Notify>,
}

#[derive(Debug)]
pub enum Admission {
    Admitted(Lease),
    AlreadyTracked,
}

struct Entry {
    file: TrackedFile,
    generation: u64,
    cancel: CancellationToken,
    wake: Arc<Notify>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<PathBuf, Entry>,
    next_generation: u64,
}

/// Shared handle to the registry. Clones refer to the same table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The table stays consistent across a panicking holder: every
        // mutation is a single insert/remove/field write.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking `path`. A second admit for a tracked path is a no-op.
    pub fn admit(&self, path: &Path) -> Admission {
        let mut inner = self.lock();
        if inner.entries.contains_key(path) {
            return Admission::AlreadyTracked;
        }

        inner.next_generation += 1;
        let generation = inner.next_generation;
        let lease = Lease {
            path: path.to_path_buf(),
            source_name: source_name(path),
            generation,
            cancel: CancellationToken::new(),
            wake: Arc::new(Notify::new()),
        };
        inner.entries.insert(
            path.to_path_buf(),
            Entry {
                file: TrackedFile {
                    path: lease.path.clone(),
                    source_name: lease.source_name.clone(),
                    cursor: 0,
                    file_id: None,
                    state: TailState::Starting,
                },
                generation,
                cancel: lease.cancel.clone(),
                wake: lease.wake.clone(),
            },
        );
        Admission::Admitted(lease)
    }

    /// Stop tracking `path` and cancel its worker. Returns whether an entry
    /// was removed.
    pub fn retire(&self, path: &Path) -> bool {
        let removed = self.lock().entries.remove(path);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Retire `path` only if it is still held by `generation`.
    pub fn retire_generation(&self, path: &Path, generation: u64) -> bool {
        let mut inner = self.lock();
        let owned = inner.entries.get(path).is_some_and(|e| e.generation == generation);
        if !owned {
            return false;
        }
        if let Some(entry) = inner.entries.remove(path) {
            entry.cancel.cancel();
        }
        true
    }

    /// Retire every entry. Returns how many were removed.
    pub fn retire_all(&self) -> usize {
        let drained: Vec<Entry> = self.lock().entries.drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.cancel.cancel();
        }
        drained.len()
    }

    /// Apply `f` to the entry for `path` if it is still held by `generation`.
    pub fn update(&self, path: &Path, generation: u64, f: impl FnOnce(&mut TrackedFile)) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(path) {
            if entry.generation == generation {
                f(&mut entry.file);
            }
        }
    }

    /// Nudge the worker for `path`. Returns whether the path is tracked.
    pub fn wake(&self, path: &Path) -> bool {
        match self.lock().entries.get(path) {
            Some(entry) => {
                entry.wake.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().entries.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<TrackedFile> {
        self.lock().entries.get(path).map(|e| e.file.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().entries.keys().cloned().collect()
    }

    /// Copy of every entry, sorted by path.
    pub fn snapshot(&self) -> Vec<TrackedFile> {
        let mut files: Vec<_> = self.lock().entries.values().map(|e| e.file.clone()).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("tracked", &self.len()).finish()
    }
}
