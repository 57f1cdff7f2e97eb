//! Domain-specific assertion macros for loggy harnesses.
//!
//! These wrap `pretty_assertions` and add context-rich failure messages that
//! make it clear which tailing guarantee was violated.

// ---------------------------------------------------------------------------
// Record assertions
// ---------------------------------------------------------------------------

/// Assert source name, level and payload of a `LogRecord`.
///
/// ```rust
/// assert_record!(records[0], "app", LogLevel::Info, "hello");
/// ```
#[macro_export]
macro_rules! assert_record {
    ($record:expr, $source:expr, $level:expr, $payload:expr) => {{
        let record: &loggy::LogRecord = &$record;
        let expected: (&str, loggy::LogLevel, &str) = ($source, $level, $payload);
        pretty_assertions::assert_eq!(
            (record.source_name.as_str(), record.level, record.payload.as_str()),
            expected,
            "assert_record! failed for {:?}",
            record
        );
    }};
}

/// Assert the exact payload sequence a `CollectingSink` received.
///
/// ```rust
/// assert_payloads!(sink, ["one", "two"]);
/// ```
#[macro_export]
macro_rules! assert_payloads {
    ($sink:expr, [$($payload:expr),* $(,)?]) => {{
        let expected: Vec<String> = vec![$($payload.to_string()),*];
        pretty_assertions::assert_eq!($sink.payloads(), expected, "delivered payloads differ");
    }};
}

// ---------------------------------------------------------------------------
// Registry assertions
// ---------------------------------------------------------------------------

/// Assert that no tracked path contains `needle`.
///
/// ```rust
/// assert_never_tracked!(tailer.registry, "kube-system");
/// ```
#[macro_export]
macro_rules! assert_never_tracked {
    ($registry:expr, $needle:expr) => {{
        let needle: &str = $needle;
        let hits: Vec<_> = $registry
            .paths()
            .into_iter()
            .filter(|p| p.to_string_lossy().contains(needle))
            .collect();
        if !hits.is_empty() {
            panic!(
                "assert_never_tracked! failed: {:?} matched tracked paths {:?}",
                needle, hits
            );
        }
    }};
}

/// Assert that every record's payload is unique.
pub fn assert_no_duplicates(payloads: &[String]) {
    let mut seen = std::collections::HashSet::new();
    for payload in payloads {
        assert!(seen.insert(payload), "payload delivered twice: {payload:?}");
    }
}
