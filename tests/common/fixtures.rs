//! Static log corpora and line constructors used across harnesses.
//!
//! Docker json-file lines carry their `\n` inside the `log` field; CRI lines
//! carry a leading RFC 3339 timestamp and a `P`/`F` tag.

use serde_json::json;

/// Docker json-file lines as written by dockerd's json-file driver.
pub const CORPUS_DOCKER: &[&str] = &[
    r#"{"log":"Server started on :8080\n","stream":"stdout","time":"2024-01-15T10:00:00.000000000Z"}"#,
    r#"{"log":"connection refused: db.internal:5432\n","stream":"stderr","time":"2024-01-15T10:00:01.123456789Z"}"#,
    r#"{"log":"{\"level\":\"info\",\"msg\":\"nested json payload\"}\n","stream":"stdout","time":"2024-01-15T10:00:02Z"}"#,
    r#"{"stream":"stdout","log":"field order does not matter\n"}"#,
    r#"{"log":"no trailing newline","stream":"stderr"}"#,
    r#"{"log":"unicode: ünïcødé ✓\n","stream":"stdout","time":"2024-01-15T10:00:03+02:00"}"#,
    r#"{"log":"\n","stream":"stdout","time":"2024-01-15T10:00:04Z"}"#,
];

/// CRI lines as written by containerd and CRI-O.
pub const CORPUS_CRI: &[&str] = &[
    "2024-01-15T10:00:00.000000000Z stdout F Server started on :8080",
    "2024-01-15T10:00:01.123456789Z stderr F connection refused: db.internal:5432",
    "2024-01-15T10:00:02Z stdout P first half of a long line",
    "2024-01-15T10:00:02Z stdout F  and the second half",
    "2024-01-15T10:00:03+00:00 stdout F",
    "2024-01-15T10:00:04Z stderr F:extra tag fields",
];

/// Lines no decoder mode accepts.
pub const CORPUS_MALFORMED: &[&str] = &[
    "plain text with no structure",
    r#"{"log":"missing stream\n"}"#,
    r#"{"log":"bad stream\n","stream":"stdin"}"#,
    r#"{"log":"truncated"#,
    "[1, 2, 3]",
    "2024-01-15T10:00:00Z stdout",
    "2024-01-15T10:00:00Z stdlog F wrong stream",
    "yesterday stdout F bad timestamp",
];

/// File names the default exclude rule must reject.
pub const KUBE_SYSTEM_FILES: &[&str] = &[
    "coredns-5d78c9869d-abcde_kube-system_coredns-0123456789.log",
    "kube-proxy-x7k2p_kube-system_kube-proxy-abcdef.log",
    "etcd-node1_kube-system_etcd-fedcba.log",
];

/// One Docker json-file line.
pub fn docker_line(stream: &str, message: &str) -> String {
    json!({
        "log": format!("{message}\n"),
        "stream": stream,
        "time": "2024-01-15T10:00:00Z",
    })
    .to_string()
}

/// One full CRI line.
pub fn cri_line(stream: &str, message: &str) -> String {
    format!("2024-01-15T10:00:00.000000000Z {stream} F {message}")
}

/// `n` numbered stdout lines: `line-0`, `line-1`, ...
pub fn numbered_lines(prefix: &str, n: usize) -> Vec<String> {
    (0..n)
        .map(|i| docker_line("stdout", &format!("{prefix}-{i}")))
        .collect()
}
