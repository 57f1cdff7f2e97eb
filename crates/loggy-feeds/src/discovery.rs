//! Discovery decides which files in the log directory are tailed.
//!
//! A file is a candidate iff its name matches at least one include pattern
//! and no exclude pattern. The same predicate backs both the periodic
//! [`Discovery::scan`] and the push-mode [`DirectoryWatch`], so a file that
//! is excluded can never slip in through either path.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::Pattern;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use loggy_core::config::DiscoveryConfig;

use crate::error::{Error, Result};

/// Buffered filesystem notifications. Overflow is dropped; the periodic scan
/// and per-file polls pick up whatever was missed.
const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Include/exclude rules bound to one directory.
#[derive(Debug, Clone)]
pub struct Discovery {
    directory: PathBuf,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl Discovery {
    /// Build a discovery engine for `directory`. A relative directory is
    /// resolved against the current working directory; the directory itself
    /// does not have to exist yet.
    pub fn new(
        directory: impl AsRef<Path>,
        include: &[String],
        exclude: &[String],
    ) -> Result<Self> {
        let directory = directory.as_ref();
        let directory = if directory.is_absolute() {
            directory.to_path_buf()
        } else {
            std::env::current_dir()?.join(directory)
        };

        Ok(Self {
            directory,
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self> {
        Self::new(&config.directory, &config.include, &config.exclude)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Whether a file name passes the include/exclude rules.
    pub fn matches_name(&self, name: &str) -> bool {
        self.include.iter().any(|p| p.matches(name)) && !self.exclude.iter().any(|p| p.matches(name))
    }

    /// Map `path` onto the watched directory if its name is a candidate.
    ///
    /// Only the file name is inspected, so paths reported by the watch
    /// backend in a different but equivalent spelling still resolve to the
    /// same registry key.
    pub fn candidate_path(&self, path: &Path) -> Option<PathBuf> {
        let name = path.file_name()?.to_str()?;
        self.matches_name(name).then(|| self.directory.join(name))
    }

    /// Current candidate set: regular files (symlinks followed) in the
    /// directory whose names pass the rules.
    pub fn scan(&self) -> Result<BTreeSet<PathBuf>> {
        let entries = std::fs::read_dir(&self.directory).map_err(|source| Error::Discovery {
            path: self.directory.clone(),
            source,
        })?;

        let mut found = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::Discovery {
                path: self.directory.clone(),
                source,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !self.matches_name(&name) {
                continue;
            }
            let path = self.directory.join(&name);
            // Dangling symlinks and subdirectories are skipped.
            if path.is_file() {
                found.insert(path);
            }
        }
        Ok(found)
    }

    /// [`Discovery::scan`] run on the blocking pool, for callers on the
    /// async runtime.
    pub async fn scan_async(&self) -> Result<BTreeSet<PathBuf>> {
        let discovery = self.clone();
        tokio::task::spawn_blocking(move || discovery.scan())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Start a push-mode subscription on the directory.
    ///
    /// Fails when the directory does not exist or cannot be watched; the
    /// caller retries on its discovery backoff.
    pub fn subscribe(&self) -> Result<DirectoryWatch> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.try_send(res);
        })?;
        watcher.watch(&self.directory, RecursiveMode::NonRecursive)?;

        Ok(DirectoryWatch {
            _watcher: watcher,
            rx,
            discovery: self.clone(),
        })
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| Error::InvalidGlob {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// What happened to a candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEventKind {
    /// A candidate was created or renamed into the directory.
    Appeared,
    /// A candidate's content or metadata changed.
    Changed,
    /// A candidate was removed or renamed away.
    Removed,
    /// The watched directory itself went away; the subscription is dead.
    DirectoryLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEvent {
    pub kind: DirEventKind,
    pub path: PathBuf,
}

/// Live notification stream for one directory. Dropping it stops the watch.
pub struct DirectoryWatch {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<notify::Result<Event>>,
    discovery: Discovery,
}

impl DirectoryWatch {
    /// Wait for the next batch of candidate events.
    ///
    /// Returns `None` once the backend has shut down. Events for excluded
    /// or non-matching names are filtered out here.
    pub async fn next_batch(&mut self) -> Option<Vec<DirEvent>> {
        loop {
            let res = self.rx.recv().await?;
            let mut batch = self.convert(res);
            while let Ok(res) = self.rx.try_recv() {
                batch.extend(self.convert(res));
            }
            if !batch.is_empty() {
                return Some(batch);
            }
        }
    }

    fn convert(&self, res: notify::Result<Event>) -> Vec<DirEvent> {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "file watch backend reported an error");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        match event.kind {
            // Rename with both ends known: old path goes, new path appears.
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                self.push(&mut out, DirEventKind::Removed, &event.paths[0]);
                self.push(&mut out, DirEventKind::Appeared, &event.paths[1]);
            }
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.push(&mut out, DirEventKind::Appeared, path);
                }
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    if path == self.discovery.directory() {
                        out.push(DirEvent {
                            kind: DirEventKind::DirectoryLost,
                            path: path.clone(),
                        });
                    } else {
                        self.push(&mut out, DirEventKind::Removed, path);
                    }
                }
            }
            EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
                for path in &event.paths {
                    self.push(&mut out, DirEventKind::Changed, path);
                }
            }
            EventKind::Access(_) => {}
        }
        out
    }

    fn push(&self, out: &mut Vec<DirEvent>, kind: DirEventKind, path: &Path) {
        if let Some(path) = self.discovery.candidate_path(path) {
            out.push(DirEvent { kind, path });
        }
    }
}
