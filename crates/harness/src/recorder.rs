//! Capture of inbound vendor requests.
//!
//! Every request reaching the vendor API surface is appended to the
//! [`RequestRecorder`] before any validation runs, so tests can assert on
//! exactly what a client sent, including requests the harness rejected.
//! Records live for the process lifetime and are never mutated or removed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// One captured request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRecord {
    /// Position in arrival order, starting at 1.
    pub sequence: u64,
    /// When the recorder accepted the request.
    pub received_at: DateTime<Utc>,
    /// HTTP method.
    pub method: String,
    /// Request path relative to the API base path.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Header values keyed by lower-cased name, in arrival order.
    pub headers: BTreeMap<String, Vec<String>>,
    /// Body decoded as JSON; `None` when empty or not JSON.
    pub body: Option<Value>,
}

/// Append-only, concurrency-safe request log.
///
/// Appends take the write lock, which also assigns the sequence number, so
/// sequence order equals append order. Snapshots take the read lock and
/// return owned copies.
#[derive(Debug, Default)]
pub struct RequestRecorder {
    records: RwLock<Vec<RequestRecord>>,
}

impl RequestRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request and returns its sequence number.
    #[tracing::instrument(skip(self, headers, raw_body), fields(body_len = raw_body.len()))]
    pub fn record(
        &self,
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: BTreeMap<String, Vec<String>>,
        raw_body: &[u8],
    ) -> u64 {
        let body = decode_body(raw_body);
        let mut records = self.records.write();
        let sequence = records.len() as u64 + 1;
        records.push(RequestRecord {
            sequence,
            received_at: Utc::now(),
            method: method.to_owned(),
            path: path.to_owned(),
            query: query.map(str::to_owned),
            headers,
            body,
        });
        sequence
    }

    /// Owned copy of every record, in sequence order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.records.read().clone()
    }

    /// Number of recorded requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records matching `method` (case-insensitive) and exact `path`.
    #[must_use]
    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RequestRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.method.eq_ignore_ascii_case(method) && r.path == path)
            .cloned()
            .collect()
    }
}

fn decode_body(raw: &[u8]) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_slice(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, len = raw.len(), "request body is not JSON; recording without body");
            None
        },
    }
}
