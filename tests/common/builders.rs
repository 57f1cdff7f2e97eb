//! Test builders — records, log directories and running tailers.
//!
//! These builders are designed for readability in test assertions, not for
//! production use. They panic on invalid input rather than returning `Result`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use loggy::{Config, LogRecord, Sink, StatsSnapshot, Stream, Tailer};
use loggy_feeds::{Registry, RouterStats, TailState};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// RecordBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`LogRecord`] test fixtures.
///
/// ```rust
/// let record = RecordBuilder::new("disk full")
///     .source("api")
///     .stream(Stream::Stderr)
///     .build();
/// ```
pub struct RecordBuilder {
    source_name: String,
    stream: Stream,
    payload: String,
    received_at: DateTime<Utc>,
    timestamp: Option<DateTime<Utc>>,
    partial: bool,
}

impl RecordBuilder {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            source_name: "app".to_string(),
            stream: Stream::Stdout,
            payload: payload.into(),
            received_at: fixed_time(),
            timestamp: None,
            partial: false,
        }
    }

    pub fn source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    pub fn stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = at;
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn build(self) -> LogRecord {
        LogRecord {
            source_name: self.source_name,
            stream: self.stream,
            level: self.stream.level(),
            payload: self.payload,
            received_at: self.received_at,
            timestamp: self.timestamp,
            partial: self.partial,
        }
    }
}

/// 2024-01-15T10:00:00Z, the timestamp used across fixtures.
pub fn fixed_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T10:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

// ---------------------------------------------------------------------------
// LogDir
// ---------------------------------------------------------------------------

/// A temporary container-log directory.
pub struct LogDir {
    dir: TempDir,
}

impl LogDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Create (or replace) `name` with `content`.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.file(name);
        fs::write(&path, content).unwrap();
        path
    }

    /// Append each line plus a `\n` to `name`, creating it if needed.
    pub fn append(&self, name: &str, lines: &[String]) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file(name))
            .unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
    }

    /// Rotate `name` the way logrotate's default mode does: rename it to
    /// `name.1`, then create a fresh file at the original path.
    pub fn rotate(&self, name: &str, content: &str) {
        fs::rename(self.file(name), self.file(&format!("{name}.1"))).unwrap();
        self.write(name, content);
    }

    /// Truncate `name` in place (`> file.log`).
    pub fn truncate(&self, name: &str) {
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.file(name))
            .unwrap();
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.file(name)).unwrap();
    }

    /// Engine config pointed at this directory with short intervals so
    /// harnesses run quickly.
    pub fn config(&self) -> Config {
        fast_config(self.path())
    }
}

pub fn fast_config(dir: &Path) -> Config {
    let mut config = Config::defaults();
    config.discovery.directory = dir.to_path_buf();
    config.discovery.rescan_interval_ms = 50;
    config.discovery.backoff_initial_ms = 20;
    config.discovery.backoff_max_ms = 100;
    config.tail.poll_interval_ms = 20;
    config.tail.missing_grace_polls = 3;
    config.router.drain_timeout_ms = 2_000;
    config
}

// ---------------------------------------------------------------------------
// Running tailer
// ---------------------------------------------------------------------------

/// A [`Tailer`] running on the test runtime.
pub struct RunningTailer {
    pub registry: Registry,
    pub stats: Arc<RouterStats>,
    shutdown: CancellationToken,
    task: JoinHandle<loggy_feeds::Result<StatsSnapshot>>,
}

impl RunningTailer {
    pub fn start<S: Sink>(config: Config, sink: S) -> Self {
        let tailer = Tailer::new(config, sink).unwrap();
        let registry = tailer.registry();
        let stats = tailer.stats();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(tailer.run(shutdown.clone()));
        Self {
            registry,
            stats,
            shutdown,
            task,
        }
    }

    /// Wait until `path` has been opened at least once.
    pub async fn wait_tailing(&self, path: &Path) {
        let registry = self.registry.clone();
        wait_until(&format!("{} to be tailed", path.display()), || {
            registry
                .get(path)
                .is_some_and(|f| f.state == TailState::Tailing)
        })
        .await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Request shutdown and return the final counters.
    pub async fn stop(self) -> StatsSnapshot {
        self.shutdown.cancel();
        self.task.await.unwrap().unwrap()
    }
}

/// Poll `check` every 10 ms until it holds, failing after five seconds.
pub async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Let the engine run for a few scan and poll cycles.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}
