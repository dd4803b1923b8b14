//! Local query runner.
//!
//! Wires one statement through the full pipeline: heap watcher, one work
//! manager per interface, the streaming aggregator, row assembly, time
//! binning, sort/truncation, and reverse-DNS enrichment. Cancellation is a
//! single flag propagated to every task; the memory guard trips it as
//! well.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::db::catalog::interfaces;
use crate::engine::aggregate::{AggregateResult, aggregate};
use crate::engine::memory::{
    HeapWatcher, MemoryProbe, SystemProbe, WATCH_INTERVAL, release_memory_to_os,
};
use crate::engine::work_manager::{CHANNEL_DEPTH, HostInfo, QueryStats, WorkManager};
use crate::query::{IfaceSelection, QueryError, Statement};
use crate::results::{
    Labels, QueryEcho, QueryResult, Row, RowAttributes, Status, Summary, Timings, bin_rows,
    sort_rows, truncate_rows,
};
use crate::types::attributes::Attribute;
use crate::types::protocols::proto_display;

/// Executes statements against a local block database.
pub struct LocalRunner {
    db_root: PathBuf,
    host: HostInfo,
    probe: Mutex<Option<Box<dyn MemoryProbe>>>,
    #[cfg(feature = "dns")]
    resolver: Option<Arc<dyn crate::dns::ReverseResolver>>,
}

impl LocalRunner {
    pub fn new(db_root: impl Into<PathBuf>) -> Self {
        let hostname = local_hostname();
        let host_id = xxhash_rust::xxh3::xxh3_64(hostname.as_bytes());
        Self {
            db_root: db_root.into(),
            host: HostInfo { hostname, host_id },
            probe: Mutex::new(None),
            #[cfg(feature = "dns")]
            resolver: None,
        }
    }

    /// Overrides the host identity attached to results.
    pub fn with_host(mut self, hostname: impl Into<String>, host_id: u64) -> Self {
        self.host = HostInfo {
            hostname: hostname.into(),
            host_id,
        };
        self
    }

    /// Injects a memory probe (tests use a fake one).
    pub fn with_probe(self, probe: Box<dyn MemoryProbe>) -> Self {
        *self.probe.lock().unwrap() = Some(probe);
        self
    }

    /// Injects a reverse resolver (tests use a table-backed one).
    #[cfg(feature = "dns")]
    pub fn with_resolver(mut self, resolver: Arc<dyn crate::dns::ReverseResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Runs the statement to completion, or until `cancel` is set.
    pub fn run(&self, stmt: &Statement, cancel: &AtomicBool) -> QueryResult {
        let t0 = Instant::now();
        let query_start = chrono::Utc::now().timestamp();
        let stats = QueryStats::new();
        let echo = plan_echo(stmt);

        // Resolve the interface selection against the database. Explicitly
        // listed names are kept even when absent so their read error
        // surfaces instead of silently yielding nothing.
        let selected: Vec<String> = match &stmt.ifaces {
            IfaceSelection::List(names) => names.clone(),
            selection => match interfaces(&self.db_root) {
                Ok(all) => all.into_iter().filter(|n| selection.matches(n)).collect(),
                Err(e) => {
                    return error_result(
                        echo,
                        QueryError::db(e.to_string()),
                        summary(&stats, Vec::new(), query_start, t0, 0),
                    );
                }
            },
        };
        if selected.is_empty() {
            return empty_result(echo, summary(&stats, selected, query_start, t0, 0));
        }
        debug!(ifaces = ?selected, first = stmt.first, last = stmt.last, "starting query");

        let probe = self
            .probe
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Box::new(SystemProbe::new()));
        if let Err(err) = crate::engine::memory::check_limit(&*probe, stmt.max_mem_pct) {
            warn!(error = %err, "query rejected by memory guard");
            return error_result(echo, err, summary(&stats, selected, query_start, t0, 0));
        }
        let (err_tx, err_rx) = mpsc::sync_channel(1);
        let watcher = HeapWatcher::spawn(probe, stmt.max_mem_pct, WATCH_INTERVAL, err_tx);

        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let breach: Mutex<Option<QueryError>> = Mutex::new(None);
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let managers: Vec<WorkManager> = selected
            .iter()
            .map(|iface| {
                WorkManager::new(&self.db_root, iface.clone(), stmt, &stats, self.host.clone())
            })
            .collect();

        let outcome = std::thread::scope(|s| {
            for mgr in &managers {
                let tx = tx.clone();
                s.spawn(move || mgr.run(&tx, cancel, workers));
            }
            drop(tx);

            let split_ifaces = stmt.label_selector.iface;
            let low_mem = stmt.low_mem;
            let agg_handle = s.spawn(move || aggregate(rx, split_ifaces, low_mem, cancel));

            // Converts a watcher trip into cancellation; exits when the
            // watcher drops its sender.
            let breach_slot = &breach;
            s.spawn(move || {
                if let Ok(err) = err_rx.recv() {
                    *breach_slot.lock().unwrap() = Some(err);
                    cancel.store(true, Ordering::Relaxed);
                }
            });

            let outcome = agg_handle
                .join()
                .unwrap_or_else(|_| Err(QueryError::internal("aggregator panicked")));
            watcher.stop();
            outcome
        });

        if let Some(err) = breach.into_inner().unwrap() {
            // The in-flight maps are gone with `outcome`; hand the pages
            // back before reporting.
            drop(outcome);
            release_memory_to_os();
            warn!(error = %err, "query aborted by memory guard");
            return error_result(echo, err, summary(&stats, selected, query_start, t0, 0));
        }

        let agg = match outcome {
            Ok(agg) => agg,
            Err(err) => {
                warn!(error = %err, "query failed");
                return error_result(echo, err, summary(&stats, selected, query_start, t0, 0));
            }
        };

        if agg.is_empty() {
            return empty_result(echo, summary(&stats, selected, query_start, t0, 0));
        }

        let totals = agg.totals;
        let mut rows = assemble_rows(agg, stmt);

        if let Some(bucket) = stmt.bucket {
            rows = bin_rows(rows, bucket);
        }
        sort_rows(&mut rows, stmt.sort_by, stmt.direction, stmt.ascending);
        let hits = truncate_rows(&mut rows, stmt.num_results);

        #[cfg(feature = "dns")]
        let resolution_ns = self.enrich(stmt, &mut rows);
        #[cfg(not(feature = "dns"))]
        let resolution_ns = 0u64;

        let mut summary = summary(&stats, selected, query_start, t0, resolution_ns);
        summary.totals = totals;
        summary.hits = hits;

        info!(
            rows = hits.displayed,
            total = hits.total,
            duration_ms = t0.elapsed().as_millis() as u64,
            "query finished"
        );

        QueryResult {
            status: Status::ok(),
            summary,
            query: echo,
            rows,
            ..QueryResult::default()
        }
    }

    #[cfg(feature = "dns")]
    fn enrich(&self, stmt: &Statement, rows: &mut [Row]) -> u64 {
        let Some(cfg) = &stmt.dns else { return 0 };
        let resolver = match &self.resolver {
            Some(r) => r.clone(),
            None => match crate::dns::SystemResolver::from_system() {
                Ok(r) => Arc::new(r) as Arc<dyn crate::dns::ReverseResolver>,
                Err(e) => {
                    warn!(error = %e, "reverse DNS unavailable");
                    return 0;
                }
            },
        };
        crate::dns::resolve_rows(resolver, rows, cfg).as_nanos() as u64
    }
}

/// Materialises rows from the final maps, extracting only the fields the
/// statement selected. The maps are consumed. In low-memory mode each map
/// is drained entry-by-entry and its pages are handed back per interface,
/// so the full map and the full row set never coexist.
fn assemble_rows(agg: AggregateResult, stmt: &Statement) -> Vec<Row> {
    let total: usize = agg.by_iface.iter().map(|(_, m)| m.len()).sum();
    let mut rows = Vec::with_capacity(total);

    let hostname = agg.hostname;
    let host_id = agg.host_id;
    for (iface, mut map) in agg.by_iface {
        if stmt.low_mem {
            for (key, counters) in map.drain() {
                rows.push(make_row(&key, counters, &iface, &hostname, host_id, stmt));
            }
            drop(map);
            release_memory_to_os();
        } else {
            for (key, counters) in map {
                rows.push(make_row(&key, counters, &iface, &hostname, host_id, stmt));
            }
        }
    }
    rows
}

fn make_row(
    key: &crate::types::Key,
    counters: crate::types::Counters,
    iface: &str,
    hostname: &str,
    host_id: u64,
    stmt: &Statement,
) -> Row {
    let mut attributes = RowAttributes::default();
    for attr in &stmt.attributes {
        match attr {
            Attribute::Sip => attributes.sip = Some(key.sip().to_string()),
            Attribute::Dip => attributes.dip = Some(key.dip().to_string()),
            Attribute::Dport => attributes.dport = Some(key.dport()),
            Attribute::Proto => attributes.proto = Some(proto_display(key.proto())),
        }
    }
    Row {
        labels: Labels {
            timestamp: key.timestamp().unwrap_or(0),
            iface: if stmt.label_selector.iface {
                iface.to_string()
            } else {
                String::new()
            },
            hostname: if stmt.label_selector.hostname {
                hostname.to_string()
            } else {
                String::new()
            },
            host_id: if stmt.label_selector.host_id {
                host_id
            } else {
                0
            },
        },
        attributes,
        counters,
    }
}

fn plan_echo(stmt: &Statement) -> QueryEcho {
    QueryEcho {
        attributes: stmt.attribute_names(),
        condition: stmt.condition_echo.clone(),
        direction: stmt.direction.to_string(),
    }
}

fn summary(
    stats: &QueryStats,
    interfaces: Vec<String>,
    query_start: i64,
    t0: Instant,
    resolution_ns: u64,
) -> Summary {
    let (time_first, time_last) = stats.covered_interval().unwrap_or((0, 0));
    Summary {
        interfaces,
        hosts: 1,
        time_first,
        time_last,
        totals: Default::default(),
        timings: Timings {
            query_start,
            query_duration_ns: t0.elapsed().as_nanos() as u64,
            resolution_duration_ns: resolution_ns,
        },
        hits: Default::default(),
        stats: Some(stats.snapshot()),
    }
}

fn empty_result(echo: QueryEcho, summary: Summary) -> QueryResult {
    QueryResult {
        status: Status::empty(),
        summary,
        query: echo,
        ..QueryResult::default()
    }
}

fn error_result(echo: QueryEcho, err: QueryError, summary: Summary) -> QueryResult {
    QueryResult {
        status: Status::error(err.to_string()),
        error: Some(err),
        summary,
        query: echo,
        ..QueryResult::default()
    }
}

/// Machine hostname via the `hostname` command.
fn local_hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|out| {
            if out.status.success() {
                String::from_utf8(out.stdout)
                    .ok()
                    .map(|s| s.trim().to_string())
            } else {
                None
            }
        })
        .unwrap_or_default()
}
