//! Where routed records end up.
//!
//! The router treats delivery as best-effort: an error is logged, retried
//! up to the configured budget, and the record is then dropped.

use std::future::Future;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use loggy_core::config::SinkFormat;
use loggy_core::LogRecord;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Downstream consumer of decoded records.
///
/// Implementations may be slow; the router owns the sink exclusively and
/// calls it from a single task, so `&mut self` needs no locking.
pub trait Sink: Send + 'static {
    fn deliver(&mut self, record: &LogRecord)
        -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Render a record the way the built-in sinks print it.
pub fn render(record: &LogRecord, format: SinkFormat) -> Result<String, SinkError> {
    match format {
        SinkFormat::Text => Ok(format!(
            "{}/[{}] : {}",
            record.source_name, record.level, record.payload
        )),
        SinkFormat::Json => Ok(serde_json::to_string(record)?),
    }
}

/// Writes one rendered line per record to any `AsyncWrite`.
///
/// A stalled writer, such as a full stdout pipe, parks the router task
/// instead of a runtime thread.
pub struct WriterSink<W> {
    writer: W,
    format: SinkFormat,
}

impl<W: AsyncWrite + Unpin + Send + 'static> WriterSink<W> {
    pub fn new(writer: W, format: SinkFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> Sink for WriterSink<W> {
    fn deliver(&mut self, record: &LogRecord) -> impl Future<Output = Result<(), SinkError>> + Send {
        let rendered = render(record, self.format);
        async move {
            let mut line = rendered?;
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await?;
            Ok(())
        }
    }
}

/// Sink printing to the process's standard output.
pub type StdoutSink = WriterSink<tokio::io::Stdout>;

impl StdoutSink {
    pub fn stdout(format: SinkFormat) -> Self {
        WriterSink::new(tokio::io::stdout(), format)
    }
}
