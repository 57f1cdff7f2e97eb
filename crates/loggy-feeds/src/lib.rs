//! loggy-feeds — the file tailing engine.
//!
//! [`Tailer`] watches one directory for log files matching the configured
//! patterns, runs one tail worker per file and pushes every decoded
//! [`loggy_core::LogRecord`] through a bounded queue to a [`Sink`].
//!
//! ```no_run
//! use loggy_core::config::Config;
//! use loggy_feeds::{StdoutSink, Tailer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> loggy_feeds::Result<()> {
//! let config = Config::load(None).map_err(|e| loggy_feeds::Error::Config(e.to_string()))?;
//! let sink = StdoutSink::stdout(config.sink.format);
//! let shutdown = CancellationToken::new();
//! let stats = Tailer::new(config, sink)?.run(shutdown).await?;
//! println!("delivered {} records", stats.delivered);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod discovery;
pub mod error;
pub mod file_id;
pub mod registry;
pub mod router;
pub mod sink;
pub mod tail;
pub mod watch;

pub use discovery::{DirEvent, DirEventKind, DirectoryWatch, Discovery};
pub use error::{Error, Result};
pub use file_id::FileId;
pub use registry::{Admission, Lease, Registry, TailState, TrackedFile};
pub use router::{DecodeFailure, Router, RouterHandle, RouterStats, StatsSnapshot};
pub use sink::{render, Sink, SinkError, StdoutSink, WriterSink};
pub use tail::{TailOptions, TailReader};
pub use watch::Tailer;
