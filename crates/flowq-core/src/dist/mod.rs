//! Distributed query execution: host resolution, SSE framing, result
//! merging, and (with the `dist` feature) the HTTP remote runner.

#[cfg(feature = "dist")]
pub mod client;
pub mod hosts;
pub mod merge;
pub mod sse;

#[cfg(feature = "dist")]
pub use client::{QUERY_PATH, RemoteError, RemoteRunner};
pub use hosts::{HostResolutionError, HostResolver, Registry, StaticResolver, StringResolver};
#[cfg(feature = "dist")]
pub use merge::DistributedRunner;
pub use merge::merge_results;
pub use sse::{
    EVENT_FINAL_RESULT, EVENT_PARTIAL_RESULT, EVENT_QUERY_ERROR, StreamError, read_stream,
    write_event, write_keepalive,
};
