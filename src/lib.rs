//! loggy — container log tailer.
//!
//! Discovers log files in a directory (by default the kubelet's
//! `/var/log/containers`), tails each one, decodes Docker json-file or CRI
//! lines and hands the records to a sink. This crate re-exports the two
//! layers so that integration tests and embedders can import them directly.
//!
//! # Architecture
//!
//! ```text
//! Watch loop ──► Discovery ──► Registry ──► Tail workers ──► Router ──► Sink
//! ```
//!
//! Workers run as `tokio` tasks and share one bounded delivery queue; the
//! router drains it into the sink from a single task.

pub use loggy_core;
pub use loggy_feeds;

pub use loggy_core::config::{Config, SinkFormat, StartAt};
pub use loggy_core::{LogLevel, LogRecord, Stream};
pub use loggy_feeds::{Sink, SinkError, StatsSnapshot, StdoutSink, Tailer};

use tokio_util::sync::CancellationToken;

/// Tail according to `config` into `sink` until `shutdown` is cancelled.
pub async fn run<S: Sink>(
    config: Config,
    sink: S,
    shutdown: CancellationToken,
) -> anyhow::Result<StatsSnapshot> {
    let tailer = Tailer::new(config, sink)?;
    Ok(tailer.run(shutdown).await?)
}
