//! Core types for loggy-core.
//!
//! This module defines the data shared by every stage of the tailing
//! pipeline: the decoded [`LogRecord`], the [`Stream`] it was written to and
//! the [`LogLevel`] derived from that stream.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One decoded line of a container log file.
///
/// Records are produced by the decoder and consumed immediately by the
/// router; nothing in loggy persists them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Label derived from the log file name (see [`crate::source::source_name`]).
    pub source_name: String,
    /// Output stream the container wrote the line to.
    pub stream: Stream,
    /// Severity classified from the stream.
    pub level: LogLevel,
    /// Message text with the trailing line terminator removed.
    pub payload: String,
    /// Local time at which the line was decoded.
    pub received_at: DateTime<Utc>,
    /// Timestamp embedded in the line by the container runtime, if any.
    pub timestamp: Option<DateTime<Utc>>,
    /// CRI partial-line marker. Always `false` for json-file lines.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

/// Container output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    /// Parse the runtime's stream indicator. Anything other than `stdout` or
    /// `stderr` is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdout" => Some(Stream::Stdout),
            "stderr" => Some(Stream::Stderr),
            _ => None,
        }
    }

    /// Severity implied by the stream: stderr is an error, stdout is info.
    pub fn level(self) -> LogLevel {
        match self {
            Stream::Stdout => LogLevel::Info,
            Stream::Stderr => LogLevel::Error,
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}
