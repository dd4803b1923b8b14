//! Error taxonomy of the query path.
//!
//! Validation problems are aggregated into a single [`ArgsError`] carrying
//! one [`DetailError`] per offending field; the query is never executed.
//! Execution problems are typed [`QueryError`]s distinguishable by kind, so
//! an operator can tell "aborted to protect the host" from "bug".

use serde::{Deserialize, Serialize};

/// HTTP-style status code attached to validation failures.
pub const CODE_UNPROCESSABLE: u16 = 422;

/// One offending field of a validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl DetailError {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DetailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}: {}", self.field, self.message)
        } else {
            write!(f, "{} ('{}'): {}", self.field, self.value, self.message)
        }
    }
}

/// Composite validation error: every offending field at once, never just
/// the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgsError {
    pub code: u16,
    pub details: Vec<DetailError>,
}

impl ArgsError {
    pub fn new(details: Vec<DetailError>) -> Self {
        Self {
            code: CODE_UNPROCESSABLE,
            details,
        }
    }
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "invalid query arguments:")?;
        for d in &self.details {
            writeln!(f, "  - {}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for ArgsError {}

/// Execution-phase errors, distinguishable by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryError {
    /// Empty aggregate. Not fatal; reported as status `empty`.
    NoResults,
    /// Internal invariant breach.
    InternalProcessing { message: String },
    /// The heap watcher tripped the configured memory ceiling.
    MemoryBreach { resident: u64, limit: u64 },
    /// Single-host aggregation saw conflicting host metadata.
    MismatchingHosts { expected: String, got: String },
    /// The query context was cancelled before completion.
    Canceled,
    /// The block directory structure could not be read.
    Db { message: String },
}

impl QueryError {
    pub fn internal(message: impl Into<String>) -> Self {
        QueryError::InternalProcessing {
            message: message.into(),
        }
    }

    pub fn db(message: impl Into<String>) -> Self {
        QueryError::Db {
            message: message.into(),
        }
    }

    /// Short kind identifier used in status messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::NoResults => "noResults",
            QueryError::InternalProcessing { .. } => "internalProcessing",
            QueryError::MemoryBreach { .. } => "memoryBreach",
            QueryError::MismatchingHosts { .. } => "mismatchingHosts",
            QueryError::Canceled => "canceled",
            QueryError::Db { .. } => "db",
        }
    }
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::NoResults => write!(f, "query returned no results"),
            QueryError::InternalProcessing { message } => {
                write!(f, "internal processing error: {}", message)
            }
            QueryError::MemoryBreach { resident, limit } => write!(
                f,
                "memory limit exceeded: resident {} bytes over limit {} bytes",
                resident, limit
            ),
            QueryError::MismatchingHosts { expected, got } => write!(
                f,
                "mismatching hosts in aggregation: expected '{}', got '{}'",
                expected, got
            ),
            QueryError::Canceled => write!(f, "query canceled"),
            QueryError::Db { message } => write!(f, "database error: {}", message),
        }
    }
}

impl std::error::Error for QueryError {}
