//! Remote runner: executes a statement on another host over HTTP.
//!
//! The args object is POSTed as JSON; the response is either a plain JSON
//! result or an SSE stream of partial/final events.

use std::io::BufReader;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tracing::debug;

use crate::dist::sse::{StreamError, read_stream};
use crate::query::{Args, QueryError};
use crate::results::QueryResult;

/// Path the query server exposes.
pub const QUERY_PATH: &str = "/api/v1/_query";

/// Error type for remote execution failures.
#[derive(Debug)]
pub enum RemoteError {
    /// Transport failure (connect, send, read).
    Http(String),
    /// Non-success HTTP status, body included.
    Status(u16, String),
    /// The remote reported a query error.
    Query(QueryError),
    /// Undecodable response body.
    Decode(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::Http(msg) => write!(f, "request failed: {}", msg),
            RemoteError::Status(code, body) => write!(f, "HTTP {}: {}", code, body),
            RemoteError::Query(e) => write!(f, "{}", e),
            RemoteError::Decode(msg) => write!(f, "undecodable response: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

/// HTTP client for one or more query servers.
pub struct RemoteRunner {
    client: reqwest::blocking::Client,
    streaming: bool,
}

impl RemoteRunner {
    pub fn new() -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            // No overall timeout: queries may legitimately run long; the
            // caller's cancellation flag bounds the wait.
            .timeout(None)
            .build()
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(Self {
            client,
            streaming: false,
        })
    }

    /// Requests an SSE stream instead of a single JSON body.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Runs the args on `host` (a `host:port` target) and returns its
    /// result. `on_update` fires for streamed partial results.
    pub fn run(
        &self,
        host: &str,
        args: &Args,
        cancel: &AtomicBool,
        mut on_update: impl FnMut(&QueryResult),
    ) -> Result<QueryResult, RemoteError> {
        let url = format!("http://{}{}", host, QUERY_PATH);
        debug!(%url, streaming = self.streaming, "dispatching remote query");

        let mut request = self.client.post(&url).json(args);
        if self.streaming {
            request = request.header(reqwest::header::ACCEPT, "text/event-stream");
        }
        let response = request
            .send()
            .map_err(|e| RemoteError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RemoteError::Status(status.as_u16(), body));
        }

        let is_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            let reader = BufReader::new(response);
            let outcome = read_stream(reader, cancel, &mut on_update, |_| {});
            match outcome {
                Ok(Some(result)) => Ok(result),
                Ok(None) => Err(RemoteError::Decode(
                    "stream closed without a result".to_string(),
                )),
                Err(StreamError::Query(e)) => Err(RemoteError::Query(e)),
                Err(e) => Err(RemoteError::Decode(e.to_string())),
            }
        } else {
            response
                .json::<QueryResult>()
                .map_err(|e| RemoteError::Decode(e.to_string()))
        }
    }
}
