//! Pre-rendered telemetry lines and the data kinds they belong to

use serde::{Deserialize, Serialize};

/// Category of data a pipeline carries
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Points,
    Histograms,
    Spans,
    SpanLogs,
    Events,
}

impl DataKind {
    pub const ALL: [DataKind; 5] = [
        DataKind::Points,
        DataKind::Histograms,
        DataKind::Spans,
        DataKind::SpanLogs,
        DataKind::Events,
    ];

    /// Value of the `f` query parameter on the report endpoint
    pub fn format(&self) -> &'static str {
        match self {
            DataKind::Points => "wavefront",
            DataKind::Histograms => "histogram",
            DataKind::Spans => "trace",
            DataKind::SpanLogs => "spanLogs",
            DataKind::Events => "event",
        }
    }

    /// Spans and span logs go to the traces destination
    pub fn is_trace_data(&self) -> bool {
        matches!(self, DataKind::Spans | DataKind::SpanLogs)
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::Points => write!(f, "points"),
            DataKind::Histograms => write!(f, "histograms"),
            DataKind::Spans => write!(f, "spans"),
            DataKind::SpanLogs => write!(f, "span_logs"),
            DataKind::Events => write!(f, "events"),
        }
    }
}

/// An already-encoded record. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    text: String,
}

impl Line {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl From<String> for Line {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for Line {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Join a batch into one newline-delimited payload.
///
/// Lines that already end in `\n` are not given a second one.
pub fn join_payload(lines: &[Line]) -> String {
    let capacity = lines.iter().map(|line| line.len() + 1).sum();
    let mut payload = String::with_capacity(capacity);

    for line in lines {
        payload.push_str(line.as_str());
        if !line.as_str().ends_with('\n') {
            payload.push('\n');
        }
    }

    payload
}
