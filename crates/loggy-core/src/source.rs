//! Source-name derivation.
//!
//! Container runtimes name log files `<pod>_<namespace>_<container>-<id>.log`
//! or `<name>-<id>.log`. The workload label is the part of the file name
//! before the first `-`.

use std::path::Path;

const SEPARATOR: char = '-';

/// Derive the source label for a log file path.
///
/// Only the final path component is considered. A file name without a
/// separator is used whole; a path without a UTF-8 file name falls back to
/// its lossy rendering.
pub fn source_name(path: &Path) -> String {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return path.to_string_lossy().into_owned(),
    };
    match name.split_once(SEPARATOR) {
        Some((head, _)) => head.to_string(),
        None => name.into_owned(),
    }
}
