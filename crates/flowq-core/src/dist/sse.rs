//! Server-sent-event framing for streamed query results.
//!
//! Wire format, one event per block:
//! ```text
//! event: <partialResult|finalResult|queryError>
//! data: <JSON>
//!
//! ```
//! Comment lines (leading `:`) carry keep-alives and are ignored by the
//! reader.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::query::QueryError;
use crate::results::QueryResult;

pub const EVENT_PARTIAL_RESULT: &str = "partialResult";
pub const EVENT_FINAL_RESULT: &str = "finalResult";
pub const EVENT_QUERY_ERROR: &str = "queryError";

/// Error type for stream decoding failures.
#[derive(Debug)]
pub enum StreamError {
    Io(io::Error),
    /// Malformed framing or undecodable payload.
    Protocol(String),
    /// The remote side reported a query error.
    Query(QueryError),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Io(e) => write!(f, "stream read failed: {}", e),
            StreamError::Protocol(msg) => write!(f, "malformed event stream: {}", msg),
            StreamError::Query(e) => write!(f, "remote query failed: {}", e),
        }
    }
}

impl std::error::Error for StreamError {}

/// Writes one framed event.
pub fn write_event<W: Write>(w: &mut W, kind: &str, data: &impl Serialize) -> io::Result<()> {
    let json = serde_json::to_string(data).map_err(io::Error::other)?;
    write!(w, "event: {}\ndata: {}\n\n", kind, json)?;
    w.flush()
}

/// Writes a keep-alive comment line.
pub fn write_keepalive<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(b": keepalive\n\n")?;
    w.flush()
}

/// Reads an event stream until a `finalResult`, an error, EOF, or
/// cancellation.
///
/// `on_update` fires for every `partialResult`, `on_finish` for the
/// `finalResult`. Cancellation and EOF return the best-effort accumulated
/// result (the last event seen). A `finalResult` always supersedes prior
/// partials.
pub fn read_stream<R: BufRead>(
    mut reader: R,
    cancel: &AtomicBool,
    mut on_update: impl FnMut(&QueryResult),
    mut on_finish: impl FnMut(&QueryResult),
) -> Result<Option<QueryResult>, StreamError> {
    let mut accumulated: Option<QueryResult> = None;
    let mut line = String::new();

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(accumulated);
        }

        line.clear();
        let n = reader.read_line(&mut line).map_err(StreamError::Io)?;
        if n == 0 {
            return Ok(accumulated);
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            continue;
        }

        let Some(kind) = trimmed.strip_prefix("event:") else {
            return Err(StreamError::Protocol(format!(
                "expected event line, got '{}'",
                trimmed
            )));
        };
        let kind = kind.trim().to_string();

        // The data line follows the event line, possibly after comments.
        let data = loop {
            line.clear();
            let n = reader.read_line(&mut line).map_err(StreamError::Io)?;
            if n == 0 {
                return Err(StreamError::Protocol("stream ended mid-event".to_string()));
            }
            let trimmed = line.trim_end();
            if trimmed.starts_with(':') {
                continue;
            }
            match trimmed.strip_prefix("data:") {
                Some(data) => break data.trim().to_string(),
                None => {
                    return Err(StreamError::Protocol(format!(
                        "expected data line, got '{}'",
                        trimmed
                    )));
                }
            }
        };

        match kind.as_str() {
            EVENT_PARTIAL_RESULT => {
                let result: QueryResult = serde_json::from_str(&data)
                    .map_err(|e| StreamError::Protocol(e.to_string()))?;
                on_update(&result);
                accumulated = Some(result);
            }
            EVENT_FINAL_RESULT => {
                let result: QueryResult = serde_json::from_str(&data)
                    .map_err(|e| StreamError::Protocol(e.to_string()))?;
                on_finish(&result);
                return Ok(Some(result));
            }
            EVENT_QUERY_ERROR => {
                let err: QueryError = serde_json::from_str(&data)
                    .map_err(|e| StreamError::Protocol(e.to_string()))?;
                return Err(StreamError::Query(err));
            }
            other => {
                return Err(StreamError::Protocol(format!(
                    "unknown event kind '{}'",
                    other
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Status, StatusCode};
    use std::io::BufReader;

    fn result(hits: usize) -> QueryResult {
        QueryResult {
            status: Status::ok(),
            summary: crate::results::Summary {
                hits: crate::results::Hits {
                    displayed: hits,
                    total: hits,
                },
                ..Default::default()
            },
            ..QueryResult::default()
        }
    }

    #[test]
    fn test_roundtrip_partial_then_final() {
        let mut buf = Vec::new();
        write_keepalive(&mut buf).unwrap();
        write_event(&mut buf, EVENT_PARTIAL_RESULT, &result(1)).unwrap();
        write_keepalive(&mut buf).unwrap();
        write_event(&mut buf, EVENT_FINAL_RESULT, &result(2)).unwrap();

        let mut updates = 0;
        let mut finished = 0;
        let out = read_stream(
            BufReader::new(&buf[..]),
            &AtomicBool::new(false),
            |_| updates += 1,
            |_| finished += 1,
        )
        .unwrap()
        .unwrap();

        assert_eq!(updates, 1);
        assert_eq!(finished, 1);
        assert_eq!(out.summary.hits.total, 2);
    }

    #[test]
    fn test_query_error_event() {
        let mut buf = Vec::new();
        write_event(
            &mut buf,
            EVENT_QUERY_ERROR,
            &QueryError::MemoryBreach {
                resident: 10,
                limit: 5,
            },
        )
        .unwrap();

        let err = read_stream(
            BufReader::new(&buf[..]),
            &AtomicBool::new(false),
            |_| {},
            |_| {},
        )
        .unwrap_err();
        match err {
            StreamError::Query(QueryError::MemoryBreach { resident, .. }) => {
                assert_eq!(resident, 10)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_eof_returns_accumulated_partial() {
        let mut buf = Vec::new();
        write_event(&mut buf, EVENT_PARTIAL_RESULT, &result(3)).unwrap();
        // Stream cut before any finalResult.

        let out = read_stream(
            BufReader::new(&buf[..]),
            &AtomicBool::new(false),
            |_| {},
            |_| {},
        )
        .unwrap()
        .unwrap();
        assert_eq!(out.summary.hits.total, 3);
        assert_eq!(out.status.code, StatusCode::Ok);
    }

    #[test]
    fn test_cancellation_aborts_read() {
        let mut buf = Vec::new();
        write_event(&mut buf, EVENT_FINAL_RESULT, &result(1)).unwrap();
        let out = read_stream(
            BufReader::new(&buf[..]),
            &AtomicBool::new(true),
            |_| {},
            |_| {},
        )
        .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_malformed_stream_rejected() {
        let buf = b"data: {}\n\n".to_vec();
        assert!(matches!(
            read_stream(
                BufReader::new(&buf[..]),
                &AtomicBool::new(false),
                |_| {},
                |_| {}
            ),
            Err(StreamError::Protocol(_))
        ));
    }
}
