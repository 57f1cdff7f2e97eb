//! Line decoder: turns one raw container log line into a [`LogRecord`].
//!
//! Two on-disk formats are understood:
//!
//! - Docker json-file: `{"log":"hello\n","stream":"stdout","time":"2024-01-15T10:00:00Z"}`
//! - CRI (containerd, CRI-O): `2024-01-15T10:00:00.000000000Z stdout F hello`
//!
//! Decoding failures are per-line and never fatal; the caller reports them
//! and moves on to the next line.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::types::{LogRecord, Stream};

/// Why a line could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON log line: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown stream {0:?}")]
    UnknownStream(String),

    #[error("malformed CRI log line: {0}")]
    Malformed(&'static str),

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Which line format the decoder expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// JSON when the line starts with `{`, CRI otherwise.
    #[default]
    Auto,
    /// Docker json-file lines only.
    Docker,
    /// CRI lines only.
    Cri,
}

#[derive(Deserialize)]
struct DockerLine {
    log: String,
    stream: String,
    #[serde(default)]
    time: Option<String>,
}

/// Stateless line decoder. Cheap to copy into every tail worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    format: LineFormat,
}

impl Decoder {
    pub fn new(format: LineFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> LineFormat {
        self.format
    }

    /// Decode `line`, tagging the record with `source_name` and the current
    /// time as `received_at`.
    pub fn decode(&self, source_name: &str, line: &str) -> Result<LogRecord, DecodeError> {
        self.decode_at(source_name, line, Utc::now())
    }

    /// Same as [`Decoder::decode`] with an explicit receive time.
    pub fn decode_at(
        &self,
        source_name: &str,
        line: &str,
        received_at: DateTime<Utc>,
    ) -> Result<LogRecord, DecodeError> {
        let use_json = match self.format {
            LineFormat::Docker => true,
            LineFormat::Cri => false,
            LineFormat::Auto => line.trim_start().starts_with('{'),
        };
        let (stream, payload, timestamp, partial) = if use_json {
            decode_docker(line)?
        } else {
            decode_cri(line)?
        };
        Ok(LogRecord {
            source_name: source_name.to_string(),
            stream,
            level: stream.level(),
            payload,
            received_at,
            timestamp,
            partial,
        })
    }
}

/// Stream, payload, embedded timestamp and partial marker of one line.
type Decoded = (Stream, String, Option<DateTime<Utc>>, bool);

fn decode_docker(line: &str) -> Result<Decoded, DecodeError> {
    let parsed: DockerLine = serde_json::from_str(line)?;
    let stream = Stream::parse(&parsed.stream)
        .ok_or_else(|| DecodeError::UnknownStream(parsed.stream.clone()))?;
    // A bad embedded timestamp doesn't invalidate the payload.
    let timestamp = parsed.time.as_deref().and_then(|t| parse_timestamp(t).ok());

    Ok((stream, strip_terminator(&parsed.log).to_string(), timestamp, false))
}

fn decode_cri(line: &str) -> Result<Decoded, DecodeError> {
    let mut parts = line.splitn(4, ' ');
    let time = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::Malformed("missing timestamp"))?;
    let stream = parts.next().ok_or(DecodeError::Malformed("missing stream"))?;
    let tag = parts.next().ok_or(DecodeError::Malformed("missing tag"))?;
    let payload = parts.next().unwrap_or("");

    let timestamp = parse_timestamp(time)?;
    let stream =
        Stream::parse(stream).ok_or_else(|| DecodeError::UnknownStream(stream.to_string()))?;
    // Tags are `:`-separated; the first one is the partial/full marker.
    let partial = match tag.split(':').next() {
        Some("P") => true,
        Some("F") => false,
        _ => return Err(DecodeError::Malformed("unknown tag")),
    };

    Ok((stream, strip_terminator(payload).to_string(), Some(timestamp), partial))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DecodeError::InvalidTimestamp(s.to_string()))
}

fn strip_terminator(s: &str) -> &str {
    let s = s.strip_suffix('\n').unwrap_or(s);
    s.strip_suffix('\r').unwrap_or(s)
}
