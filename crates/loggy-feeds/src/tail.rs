//! File tail reader and its per-file worker.
//!
//! [`TailReader`] is a synchronous state machine over one path: each
//! [`TailReader::poll`] re-stats the path, detects rotation or truncation,
//! reads whatever was appended since the cursor and returns the complete
//! lines. A trailing line without its terminator is held back until the
//! terminator arrives.
//!
//! [`run_worker`] drives one reader on the blocking pool, woken by the watch
//! backend or a poll tick, and hands decoded lines to the router.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use loggy_core::config::{StartAt, TailConfig};
use loggy_core::Decoder;

use crate::file_id::FileId;
use crate::registry::{Lease, Registry, TailState};
use crate::router::{DecodeFailure, RouterHandle};

/// Reader limits, taken from `[tail]`.
#[derive(Debug, Clone)]
pub struct TailOptions {
    pub missing_grace_polls: u32,
    pub max_line_bytes: usize,
    pub max_read_bytes: usize,
}

impl TailOptions {
    pub fn from_config(config: &TailConfig) -> Self {
        Self {
            missing_grace_polls: config.missing_grace_polls,
            max_line_bytes: config.max_line_bytes,
            max_read_bytes: config.max_read_bytes,
        }
    }
}

impl Default for TailOptions {
    fn default() -> Self {
        Self::from_config(&loggy_core::config::Config::defaults().tail)
    }
}

/// Tails a single path across appends, truncation and rotation.
pub struct TailReader {
    path: PathBuf,
    file: Option<File>,
    file_id: Option<FileId>,
    /// Bytes of the current file consumed so far, including `pending`.
    cursor: u64,
    /// Unterminated tail of the last read.
    pending: Vec<u8>,
    state: TailState,
    start_at: StartAt,
    opened_once: bool,
    missing_polls: u32,
    more: bool,
    options: TailOptions,
}

impl TailReader {
    /// Create a reader in the `Starting` state. Nothing is opened until the
    /// first poll.
    pub fn new(path: impl AsRef<Path>, start_at: StartAt, options: TailOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            file_id: None,
            cursor: 0,
            pending: Vec::new(),
            state: TailState::Starting,
            start_at,
            opened_once: false,
            missing_polls: 0,
            more: false,
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.file_id
    }

    pub fn state(&self) -> &TailState {
        &self.state
    }

    /// Whether the last poll stopped at the read bound with data left over.
    pub fn has_more(&self) -> bool {
        self.more
    }

    /// Bytes of an unterminated line held for the next poll.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Read everything appended since the last poll and return the complete
    /// lines, in file order. Errors move the reader to `Stalled`; they are
    /// retried by the next poll.
    pub fn poll(&mut self) -> Vec<String> {
        if self.state == TailState::Retired {
            return Vec::new();
        }

        match self.poll_inner() {
            Ok(lines) => {
                if let TailState::Stalled(reason) = &self.state {
                    info!(path = %self.path.display(), %reason, "log file readable again");
                }
                if self.state != TailState::Retired {
                    self.state = TailState::Tailing;
                }
                lines
            }
            Err(e) => {
                let reason = e.to_string();
                if !matches!(&self.state, TailState::Stalled(r) if *r == reason) {
                    warn!(path = %self.path.display(), error = %e, "log file stalled");
                }
                self.file = None;
                self.more = false;
                self.state = TailState::Stalled(reason);
                Vec::new()
            }
        }
    }

    /// Drop the file handle. Used when the worker is cancelled.
    pub fn close(&mut self) {
        self.file = None;
    }

    fn poll_inner(&mut self) -> io::Result<Vec<String>> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.missing_polls += 1;
                self.more = false;
                // A single miss may be a rotation in progress.
                if self.missing_polls >= self.options.missing_grace_polls {
                    self.retire();
                }
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        self.missing_polls = 0;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path is not a regular file",
            ));
        }

        let len = metadata.len();
        if self.file.is_some() && FileId::from_metadata(&metadata) != self.file_id {
            // New file at the path; `open` resets the cursor.
            self.file = None;
        }
        if self.file.is_none() {
            self.open()?;
        } else if len < self.cursor {
            info!(
                path = %self.path.display(),
                cursor = self.cursor,
                len,
                "log file truncated, reading from start"
            );
            self.reset_cursor();
        }

        self.read_available(len)
    }

    fn open(&mut self) -> io::Result<()> {
        let file = File::open(&self.path)?;
        let metadata = file.metadata()?;
        let id = FileId::from_metadata(&metadata);
        let len = metadata.len();

        if !self.opened_once {
            self.cursor = match self.start_at {
                StartAt::End => len,
                StartAt::Beginning => 0,
            };
            debug!(path = %self.path.display(), cursor = self.cursor, "opened log file");
        } else if id != self.file_id {
            info!(
                path = %self.path.display(),
                old = ?self.file_id,
                new = ?id,
                dropped_bytes = self.pending.len(),
                "log file rotated, reading new file from start"
            );
            self.state = TailState::Starting;
            self.reset_cursor();
        } else if len < self.cursor {
            info!(path = %self.path.display(), "log file truncated while stalled");
            self.reset_cursor();
        }

        self.file = Some(file);
        self.file_id = id;
        self.opened_once = true;
        Ok(())
    }

    fn reset_cursor(&mut self) {
        self.cursor = 0;
        self.pending.clear();
    }

    fn read_available(&mut self, len: u64) -> io::Result<Vec<String>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };
        if len <= self.cursor {
            self.more = false;
            return Ok(Vec::new());
        }

        let want = (len - self.cursor).min(self.options.max_read_bytes as u64);
        file.seek(SeekFrom::Start(self.cursor))?;
        let mut chunk = Vec::with_capacity(want as usize);
        let read = file.take(want).read_to_end(&mut chunk)?;

        self.cursor += read as u64;
        self.more = read > 0 && self.cursor < len;
        Ok(self.split_lines(&chunk))
    }

    fn split_lines(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(line_text(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > self.options.max_line_bytes {
            warn!(
                path = %self.path.display(),
                bytes = self.pending.len(),
                "unterminated line exceeds max_line_bytes, flushing"
            );
            lines.push(line_text(&self.pending));
            self.pending.clear();
        }
        lines
    }

    fn retire(&mut self) {
        info!(path = %self.path.display(), "log file removed, retiring");
        self.file = None;
        self.pending.clear();
        self.state = TailState::Retired;
    }
}

fn line_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Shared, immutable context cloned into every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub decoder: Decoder,
    pub router: RouterHandle,
    pub registry: Registry,
    pub poll_interval: Duration,
    pub options: TailOptions,
}

/// Tail `lease.path` until the file is retired or the lease is cancelled.
///
/// Reads run on the blocking pool so a slow filesystem never stalls the
/// runtime; no new read is started once the lease is cancelled.
pub async fn run_worker(lease: Lease, start_at: StartAt, ctx: WorkerContext) {
    let mut reader = TailReader::new(&lease.path, start_at, ctx.options.clone());
    let mut ticker = tokio::time::interval(ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(path = %lease.path.display(), source = %lease.source_name, "tail worker started");

    loop {
        if lease.cancel.is_cancelled() {
            break;
        }

        let lines;
        (reader, lines) = poll_off_runtime(reader, TailReader::poll).await;

        deliver_lines(&lease, &ctx, lines);

        ctx.registry.update(&lease.path, lease.generation, |tracked| {
            tracked.cursor = reader.cursor();
            tracked.file_id = reader.file_id();
            tracked.state = reader.state().clone();
        });

        if *reader.state() == TailState::Retired {
            ctx.registry.retire_generation(&lease.path, lease.generation);
            break;
        }
        if reader.has_more() {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            biased;
            _ = lease.cancel.cancelled() => break,
            _ = lease.wake.notified() => {}
            _ = ticker.tick() => {}
        }
    }

    reader.close();
    debug!(path = %lease.path.display(), "tail worker stopped");
}

/// Run one read on the blocking pool.
///
/// If the read panics the reader is lost with its cursor. The replacement
/// starts at the end of the file, so lines already delivered are not sent
/// again; whatever was appended in between is skipped.
async fn poll_off_runtime<F>(mut reader: TailReader, poll: F) -> (TailReader, Vec<String>)
where
    F: FnOnce(&mut TailReader) -> Vec<String> + Send + 'static,
{
    let path = reader.path.clone();
    let options = reader.options.clone();
    let polled = tokio::task::spawn_blocking(move || {
        let lines = poll(&mut reader);
        (reader, lines)
    })
    .await;

    match polled {
        Ok(pair) => pair,
        Err(e) => {
            error!(path = %path.display(), error = %e, "tail read panicked, resuming at end of file");
            (TailReader::new(path, StartAt::End, options), Vec::new())
        }
    }
}

fn deliver_lines(lease: &Lease, ctx: &WorkerContext, lines: Vec<String>) {
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match ctx.decoder.decode(&lease.source_name, &line) {
            Ok(record) => ctx.router.route(record),
            Err(e) => ctx.router.report_decode_failure(DecodeFailure {
                source_name: lease.source_name.clone(),
                path: lease.path.clone(),
                error: e.to_string(),
                line,
            }),
        }
    }
}
