//! Configuration types for loggy.
//!
//! [`Config::load`] layers, in order: the embedded defaults, an optional TOML
//! file, and `LOGGY__<SECTION>__<KEY>` environment variables.
//! [`Config::defaults`] returns the embedded defaults without touching the
//! filesystem or the environment (useful in tests).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::decoder::LineFormat;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[discovery]
directory          = "/var/log/containers"
include            = ["*.log"]
exclude            = ["*kube-system*.log"]
rescan_interval_ms = 5000
backoff_initial_ms = 500
backoff_max_ms     = 30000

[tail]
poll_interval_ms    = 250
missing_grace_polls = 3
max_line_bytes      = 262144
max_read_bytes      = 1048576
format              = "auto"
new_file_start      = "beginning"

[router]
queue_capacity   = 10000
sink_retries     = 0
drain_timeout_ms = 5000

[sink]
format = "text"
"#;

/// A single missing stat may be a rotation in progress, so retiring needs
/// at least two consecutive misses.
pub const MIN_MISSING_GRACE_POLLS: u32 = 2;

const ENV_PREFIX: &str = "LOGGY";
const ENV_SEPARATOR: &str = "__";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub tail: TailConfig,
    pub router: RouterConfig,
    pub sink: SinkConfig,
}

/// `[discovery]` section: which files to tail and how often to rescan.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Directory holding the log files. Not searched recursively.
    pub directory: PathBuf,
    /// File-name glob patterns; a file must match at least one.
    pub include: Vec<String>,
    /// File-name glob patterns; a file matching any of these is never tailed.
    pub exclude: Vec<String>,
    pub rescan_interval_ms: u64,
    /// First retry delay after a failed scan. Doubles up to `backoff_max_ms`.
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

/// `[tail]` section: per-file reader behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct TailConfig {
    pub poll_interval_ms: u64,
    /// Consecutive polls a path must be missing before its reader retires.
    /// At least [`MIN_MISSING_GRACE_POLLS`].
    pub missing_grace_polls: u32,
    /// Longest partial line held before it is flushed as a line.
    pub max_line_bytes: usize,
    /// Upper bound on bytes consumed by a single read.
    pub max_read_bytes: usize,
    pub format: LineFormat,
    /// Where readers start on files that appear after the first scan. Files
    /// present at startup are always tailed from their end.
    pub new_file_start: StartAt,
}

/// Initial read position of a newly tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    Beginning,
    End,
}

/// `[router]` section: delivery queue between readers and the sink.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Records held before the oldest is dropped.
    pub queue_capacity: usize,
    /// Extra delivery attempts after a sink error before the record is dropped.
    pub sink_retries: u32,
    pub drain_timeout_ms: u64,
}

/// `[sink]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub format: SinkFormat,
}

/// How the built-in stdout sink renders a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    /// `source/[level] : payload`
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl DiscoveryConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl TailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl RouterConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load the embedded defaults, then `path` (if given), then `LOGGY__*`
    /// environment variables. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.discovery.include.is_empty() {
            return invalid("discovery.include must name at least one pattern");
        }
        for pattern in self.discovery.include.iter().chain(&self.discovery.exclude) {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::Invalid(format!("bad pattern {pattern:?}: {e}")));
            }
        }
        if self.discovery.rescan_interval_ms == 0 || self.tail.poll_interval_ms == 0 {
            return invalid("rescan and poll intervals must be non-zero");
        }
        if self.discovery.backoff_initial_ms == 0
            || self.discovery.backoff_max_ms < self.discovery.backoff_initial_ms
        {
            return invalid("backoff_max_ms must be >= backoff_initial_ms > 0");
        }
        if self.tail.missing_grace_polls < MIN_MISSING_GRACE_POLLS {
            return Err(ConfigError::Invalid(format!(
                "tail.missing_grace_polls must be at least {MIN_MISSING_GRACE_POLLS}"
            )));
        }
        if self.tail.max_line_bytes == 0 || self.tail.max_read_bytes == 0 {
            return invalid("tail byte limits must be non-zero");
        }
        if self.router.queue_capacity == 0 {
            return invalid("router.queue_capacity must be non-zero");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
