//! Result data model.
//!
//! The JSON shape of [`QueryResult`] is the wire contract between the CLI,
//! the query server, and the distributed merger. Nested objects omit empty
//! fields.

pub mod merge;
pub mod sort;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::query::QueryError;
use crate::types::counters::Counters;

pub use merge::{bin_rows, merge_rows, truncate_rows};
pub use sort::sort_rows;

/// Result status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    Ok,
    Empty,
    Partial,
    Error,
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Ok
    }
}

/// Status of a query or of a single host's contribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub code: StatusCode,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn empty() -> Self {
        Self {
            code: StatusCode::Empty,
            message: "query returned no results".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            message: message.into(),
        }
    }
}

/// Partition labels of one row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Labels {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub timestamp: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub iface: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub host_id: u64,
}

impl Labels {
    pub fn is_empty(&self) -> bool {
        *self == Labels::default()
    }
}

/// Packet attributes of one row. Only the attributes the query grouped by
/// are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RowAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dport: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
}

/// One output row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Row {
    #[serde(skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    pub attributes: RowAttributes,
    pub counters: Counters,
}

/// Pre- and post-truncation row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hits {
    pub displayed: usize,
    pub total: usize,
}

/// Phase timings, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    #[serde(skip_serializing_if = "is_zero_i64")]
    pub query_start: i64,
    pub query_duration_ns: u64,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub resolution_duration_ns: u64,
}

/// Detailed block-store statistics for the text footer and operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbStats {
    pub bytes_loaded: u64,
    pub bytes_decompressed: u64,
    pub blocks_processed: u64,
    pub blocks_corrupted: u64,
    pub directories_processed: u64,
    pub workloads: u64,
}

/// Result summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Summary {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub hosts: usize,
    pub time_first: i64,
    pub time_last: i64,
    pub totals: Counters,
    pub timings: Timings,
    pub hits: Hits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DbStats>,
}

/// Echo of the executed plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryEcho {
    pub attributes: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub condition: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub direction: String,
}

/// The complete query output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryResult {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
    /// Per-host statuses of a distributed query.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub host_statuses: BTreeMap<String, Status>,
    pub summary: Summary,
    pub query: QueryEcho,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Row>,
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}
