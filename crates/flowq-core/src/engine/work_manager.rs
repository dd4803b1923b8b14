//! Per-interface work manager.
//!
//! One manager handles one interface partition: it enumerates the block
//! files intersecting the query range, splits them over worker threads,
//! filters every entry against the condition, folds matches into local flow
//! maps keyed by the requested grouping, and hands each map to the
//! aggregator over a bounded channel. Per-worker accumulation is local and
//! lock-free; the only synchronisation on the hot path is the channel send.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;

use tracing::{debug, warn};
use xxhash_rust::xxh3::Xxh3Builder;

use crate::db::block::BlockFile;
use crate::db::catalog::{WorkUnit, blocks_in_range};
use crate::query::{QueryError, Statement};
use crate::results::DbStats;
use crate::types::attributes::group_key;
use crate::types::counters::Counters;
use crate::types::key::Key;

/// Bounded capacity of the worker → aggregator channel.
pub const CHANNEL_DEPTH: usize = 1024;

/// A flow map from grouping key to counters, hashed with xxh3.
pub type FlowMap = HashMap<Key, Counters, Xxh3Builder>;

/// Creates an empty flow map.
pub fn new_flow_map() -> FlowMap {
    HashMap::with_hasher(Xxh3Builder::new())
}

/// Identity of the host producing partial maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostInfo {
    pub hostname: String,
    pub host_id: u64,
}

/// A partial aggregate produced by one worker from a subset of blocks.
/// Once sent, the producer never touches it again.
pub struct PartialMap {
    pub hostname: String,
    pub host_id: u64,
    pub iface: String,
    pub data: FlowMap,
    /// Sentinel: an unreadable partition surfaces here with an empty map.
    pub err: Option<QueryError>,
}

/// Shared per-query counters, updated by all workers.
#[derive(Debug, Default)]
pub struct QueryStats {
    pub bytes_loaded: AtomicU64,
    pub bytes_decompressed: AtomicU64,
    pub blocks_processed: AtomicU64,
    pub blocks_corrupted: AtomicU64,
    pub directories_processed: AtomicU64,
    pub workloads: AtomicU64,
    first_covered: AtomicI64,
    last_covered: AtomicI64,
}

impl QueryStats {
    pub fn new() -> Self {
        Self {
            first_covered: AtomicI64::new(i64::MAX),
            last_covered: AtomicI64::new(i64::MIN),
            ..Self::default()
        }
    }

    /// Folds a processed block timestamp into the covered interval.
    pub fn record_covered(&self, ts: i64) {
        self.first_covered.fetch_min(ts, Ordering::Relaxed);
        self.last_covered.fetch_max(ts, Ordering::Relaxed);
    }

    /// (first, last) of blocks actually processed, if any.
    pub fn covered_interval(&self) -> Option<(i64, i64)> {
        let first = self.first_covered.load(Ordering::Relaxed);
        let last = self.last_covered.load(Ordering::Relaxed);
        (first <= last).then_some((first, last))
    }

    pub fn snapshot(&self) -> DbStats {
        DbStats {
            bytes_loaded: self.bytes_loaded.load(Ordering::Relaxed),
            bytes_decompressed: self.bytes_decompressed.load(Ordering::Relaxed),
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            blocks_corrupted: self.blocks_corrupted.load(Ordering::Relaxed),
            directories_processed: self.directories_processed.load(Ordering::Relaxed),
            workloads: self.workloads.load(Ordering::Relaxed),
        }
    }
}

/// Work manager for one interface partition.
pub struct WorkManager<'a> {
    db_root: PathBuf,
    iface: String,
    stmt: &'a Statement,
    stats: &'a QueryStats,
    host: HostInfo,
}

impl<'a> WorkManager<'a> {
    pub fn new(
        db_root: impl Into<PathBuf>,
        iface: impl Into<String>,
        stmt: &'a Statement,
        stats: &'a QueryStats,
        host: HostInfo,
    ) -> Self {
        Self {
            db_root: db_root.into(),
            iface: iface.into(),
            stmt,
            stats,
            host,
        }
    }

    /// Enumerates blocks and processes them with `workers` parallel units.
    /// Partial maps go out on `tx`; a directory read error surfaces as a
    /// sentinel payload. On cancellation, no new reads are issued and
    /// in-flight units drain promptly.
    pub fn run(&self, tx: &SyncSender<PartialMap>, cancel: &AtomicBool, workers: usize) {
        let units = match blocks_in_range(&self.db_root, &self.iface, self.stmt.first, self.stmt.last)
        {
            Ok(units) => units,
            Err(e) => {
                warn!(iface = %self.iface, error = %e, "failed to enumerate blocks");
                let _ = tx.send(PartialMap {
                    hostname: self.host.hostname.clone(),
                    host_id: self.host.host_id,
                    iface: self.iface.clone(),
                    data: new_flow_map(),
                    err: Some(QueryError::db(format!(
                        "interface {}: {}",
                        self.iface, e
                    ))),
                });
                return;
            }
        };

        self.stats.directories_processed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .workloads
            .fetch_add(units.len() as u64, Ordering::Relaxed);

        if units.is_empty() {
            debug!(iface = %self.iface, "no blocks in range");
            return;
        }

        let workers = workers.max(1).min(units.len());
        let per_worker = units.len().div_ceil(workers);

        std::thread::scope(|s| {
            for chunk in units.chunks(per_worker) {
                let tx = tx.clone();
                s.spawn(move || self.process_units(chunk, &tx, cancel));
            }
        });
    }

    fn process_units(&self, units: &[WorkUnit], tx: &SyncSender<PartialMap>, cancel: &AtomicBool) {
        for unit in units {
            if cancel.load(Ordering::Relaxed) {
                return;
            }

            let file = match BlockFile::open(&unit.path) {
                Ok(f) => f,
                Err(e) => {
                    warn!(path = %unit.path.display(), error = %e, "failed to open block file");
                    self.stats
                        .blocks_corrupted
                        .fetch_add(unit.frames.len() as u64, Ordering::Relaxed);
                    continue;
                }
            };
            self.stats
                .bytes_loaded
                .fetch_add(file.file_size(), Ordering::Relaxed);

            let mut local = new_flow_map();
            for &(frame, block_ts) in &unit.frames {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }

                let (entries, decompressed) = match file.read_block_sized(frame) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(path = %unit.path.display(), frame, error = %e, "corrupt block");
                        self.stats.blocks_corrupted.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                };
                self.stats.blocks_processed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_decompressed
                    .fetch_add(decompressed, Ordering::Relaxed);
                self.stats.record_covered(block_ts);

                let ts_label = self.stmt.label_selector.timestamp.then_some(block_ts);
                for entry in entries {
                    let key = Key::from_bytes(entry.key);
                    if let Some(cond) = &self.stmt.condition
                        && !cond.eval(&key, &self.iface)
                    {
                        continue;
                    }
                    let grouped = group_key(&key, &self.stmt.attributes, ts_label);
                    local.entry(grouped).or_default().add(&entry.counters);
                }
            }

            if local.is_empty() {
                continue;
            }
            let payload = PartialMap {
                hostname: self.host.hostname.clone(),
                host_id: self.host.host_id,
                iface: self.iface.clone(),
                data: local,
                err: None,
            };
            // A closed channel means the consumer is gone; stop producing.
            if tx.send(payload).is_err() {
                return;
            }
        }
    }
}
