//! loggy-core — shared types for the loggy tailing engine.
//!
//! This crate holds everything that does not touch the filesystem watch
//! machinery: the decoded [`LogRecord`], the line [`Decoder`], source-name
//! derivation and the configuration layer.
//!
//! # Pipeline
//!
//! ```text
//! Watch loop ──► Discovery ──► Registry ──► Tail reader ──► Decoder ──► Router ──► Sink
//! ```
//!
//! The first and last three stages live in `loggy-feeds`.

pub mod config;
pub mod decoder;
pub mod source;
pub mod types;

pub use decoder::{DecodeError, Decoder, LineFormat};
pub use source::source_name;
pub use types::{LogLevel, LogRecord, Stream};
