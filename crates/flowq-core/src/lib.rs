//! flowq-core — query engine for a time-partitioned network-flow database.
//!
//! A capture agent writes compact per-interface blocks of IPv4/IPv6 5-tuple
//! flow counters. This library reads those blocks, filters them, aggregates
//! by user-chosen grouping attributes, sorts and truncates the result, and
//! emits it as formatted tables, CSV, or JSON.
//!
//! Provides:
//! - `types` — flow keys, counters, attributes, the condition tree
//! - `query` — argument validation and the immutable statement plan
//! - `db` — block-file reader/writer and partition catalog
//! - `engine` — work manager, aggregator, heap watcher, local runner
//! - `results` — result model, sorting, merging, time binning
//! - `print` — text / CSV / JSON table printers
//! - `util` — time expression parsing
//!
//! - `dist` — distributed merging and SSE framing; the HTTP remote runner
//!   needs the `dist` feature (default)
//!
//! With `dns` feature (default):
//! - `dns` — reverse-DNS enrichment of result rows

pub mod db;
pub mod dist;
pub mod engine;
pub mod print;
pub mod query;
pub mod results;
pub mod types;
pub mod util;

#[cfg(feature = "dns")]
pub mod dns;

/// Crate version, shown by the `version` subcommand and in query callers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
