//! Distributed merge: the same statement fanned out to N hosts, partial
//! results combined into one.
//!
//! Rows with an equal label ∪ attribute tuple sum their counters; each
//! host's status is retained in a per-host status map; durations take the
//! maximum over hosts while byte counters sum. The merged result is sorted
//! and truncated exactly like a single-host result.

use std::collections::BTreeSet;

use tracing::warn;

use crate::query::Statement;
use crate::results::{
    DbStats, QueryEcho, QueryResult, Status, StatusCode, merge_rows, sort_rows, truncate_rows,
};

/// Fans one statement out to a host list and merges the results.
#[cfg(feature = "dist")]
pub struct DistributedRunner {
    runner: crate::dist::client::RemoteRunner,
    hosts: Vec<String>,
}

#[cfg(feature = "dist")]
impl DistributedRunner {
    pub fn new(runner: crate::dist::client::RemoteRunner, hosts: Vec<String>) -> Self {
        Self { runner, hosts }
    }

    /// Runs the query on every host concurrently and merges the outcomes.
    /// A single failing host never aborts the merge.
    pub fn run(
        &self,
        args: &crate::query::Args,
        stmt: &Statement,
        cancel: &std::sync::atomic::AtomicBool,
    ) -> QueryResult {
        // The shipped args must not fan out again, and the merge needs the
        // machine-readable form.
        let mut shipped = args.clone();
        shipped.query_hosts = None;
        shipped.format = "json".to_string();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::scope(|s| {
            for host in &self.hosts {
                let tx = tx.clone();
                let shipped = &shipped;
                let runner = &self.runner;
                s.spawn(move || {
                    let outcome = runner
                        .run(host, shipped, cancel, |_| {})
                        .map_err(|e| e.to_string());
                    let _ = tx.send((host.clone(), outcome));
                });
            }
            drop(tx);
        });

        let outcomes: Vec<(String, Result<QueryResult, String>)> = rx.into_iter().collect();
        let mut merged = merge_results(outcomes, stmt);

        #[cfg(feature = "dns")]
        if let Some(cfg) = &stmt.dns
            && let Ok(resolver) = crate::dns::SystemResolver::from_system()
        {
            let took = crate::dns::resolve_rows(
                std::sync::Arc::new(resolver),
                &mut merged.rows,
                cfg,
            );
            merged.summary.timings.resolution_duration_ns = took.as_nanos() as u64;
        }

        tracing::info!(
            hosts = self.hosts.len(),
            status = ?merged.status.code,
            rows = merged.rows.len(),
            "distributed query merged"
        );
        merged
    }
}

/// Merges per-host outcomes into one result (pure; no I/O). Failed hosts
/// arrive as their error message.
pub fn merge_results(
    outcomes: Vec<(String, Result<QueryResult, String>)>,
    stmt: &Statement,
) -> QueryResult {
    let mut merged = QueryResult {
        query: QueryEcho {
            attributes: stmt.attribute_names(),
            condition: stmt.condition_echo.clone(),
            direction: stmt.direction.to_string(),
        },
        ..QueryResult::default()
    };

    let mut rows = Vec::new();
    let mut interfaces: BTreeSet<String> = BTreeSet::new();
    let mut stats = DbStats::default();
    let mut ok_hosts = 0usize;
    let mut failed_hosts = 0usize;

    for (host, outcome) in outcomes {
        match outcome {
            Ok(result) => {
                ok_hosts += 1;
                merged.host_statuses.insert(host, result.status.clone());

                rows.extend(result.rows);
                merged.summary.totals.add(&result.summary.totals);
                merged.summary.hosts += result.summary.hosts.max(1);

                let s = &result.summary;
                if s.time_first != 0 {
                    merged.summary.time_first = if merged.summary.time_first == 0 {
                        s.time_first
                    } else {
                        merged.summary.time_first.min(s.time_first)
                    };
                }
                merged.summary.time_last = merged.summary.time_last.max(s.time_last);

                // Durations: max over hosts. Byte counters: sums.
                merged.summary.timings.query_duration_ns = merged
                    .summary
                    .timings
                    .query_duration_ns
                    .max(s.timings.query_duration_ns);
                if let Some(host_stats) = &s.stats {
                    stats.bytes_loaded += host_stats.bytes_loaded;
                    stats.bytes_decompressed += host_stats.bytes_decompressed;
                    stats.blocks_processed += host_stats.blocks_processed;
                    stats.blocks_corrupted += host_stats.blocks_corrupted;
                    stats.directories_processed += host_stats.directories_processed;
                    stats.workloads += host_stats.workloads;
                }
                interfaces.extend(result.summary.interfaces);
            }
            Err(message) => {
                warn!(host = %host, error = %message, "host failed");
                failed_hosts += 1;
                merged.host_statuses.insert(host, Status::error(message));
            }
        }
    }

    merged.summary.interfaces = interfaces.into_iter().collect();
    merged.summary.stats = Some(stats);

    let mut rows = merge_rows(rows);
    sort_rows(&mut rows, stmt.sort_by, stmt.direction, stmt.ascending);
    merged.summary.hits = truncate_rows(&mut rows, stmt.num_results);
    merged.rows = rows;

    merged.status = if ok_hosts == 0 {
        Status::error("all hosts failed")
    } else if failed_hosts > 0 {
        Status {
            code: StatusCode::Partial,
            message: format!("{} of {} hosts failed", failed_hosts, failed_hosts + ok_hosts),
        }
    } else if merged.rows.is_empty() {
        Status::empty()
    } else {
        Status::ok()
    };

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Args;
    use crate::results::{Row, RowAttributes, Summary};
    use crate::types::counters::Counters;

    fn stmt() -> Statement {
        Args {
            query: "sip,dip".to_string(),
            ifaces: "eth0".to_string(),
            first: "100".to_string(),
            last: "200".to_string(),
            ..Args::default()
        }
        .prepare_at(1000)
        .unwrap()
    }

    fn row(sip: &str, dip: &str, bytes: u64) -> Row {
        Row {
            attributes: RowAttributes {
                sip: Some(sip.to_string()),
                dip: Some(dip.to_string()),
                ..RowAttributes::default()
            },
            counters: Counters::new(bytes, 0, 1, 0),
            ..Row::default()
        }
    }

    fn host_result(rows: Vec<Row>) -> QueryResult {
        let mut totals = Counters::default();
        for r in &rows {
            totals.add(&r.counters);
        }
        QueryResult {
            status: if rows.is_empty() {
                Status::empty()
            } else {
                Status::ok()
            },
            summary: Summary {
                interfaces: vec!["eth0".to_string()],
                hosts: 1,
                totals,
                ..Summary::default()
            },
            rows,
            ..QueryResult::default()
        }
    }

    #[test]
    fn test_merge_sums_overlapping_rows() {
        // Host A returns two rows, host B one overlapping row.
        let a = host_result(vec![row("1.1.1.1", "2.2.2.2", 100), row("3.3.3.3", "4.4.4.4", 10)]);
        let b = host_result(vec![row("1.1.1.1", "2.2.2.2", 50)]);

        let merged = merge_results(
            vec![("a:7777".to_string(), Ok(a)), ("b:7777".to_string(), Ok(b))],
            &stmt(),
        );

        assert_eq!(merged.status.code, StatusCode::Ok);
        // |A ∪ B| rows, overlap summed.
        assert_eq!(merged.rows.len(), 2);
        let overlap = merged
            .rows
            .iter()
            .find(|r| r.attributes.sip.as_deref() == Some("1.1.1.1"))
            .unwrap();
        assert_eq!(overlap.counters.bytes_rcvd, 150);
        assert_eq!(merged.summary.totals.bytes_rcvd, 160);
        assert_eq!(merged.summary.hosts, 2);
        // Per-host status map contains both.
        assert_eq!(merged.host_statuses.len(), 2);
        assert_eq!(merged.host_statuses["a:7777"].code, StatusCode::Ok);
    }

    #[test]
    fn test_partial_status_on_single_failure() {
        let a = host_result(vec![row("1.1.1.1", "2.2.2.2", 100)]);
        let merged = merge_results(
            vec![
                ("a:7777".to_string(), Ok(a)),
                (
                    "b:7777".to_string(),
                    Err("connection refused".to_string()),
                ),
            ],
            &stmt(),
        );

        assert_eq!(merged.status.code, StatusCode::Partial);
        assert_eq!(merged.rows.len(), 1);
        assert_eq!(merged.host_statuses["b:7777"].code, StatusCode::Error);
    }

    #[test]
    fn test_all_hosts_failed_is_error() {
        let merged = merge_results(
            vec![(
                "a:7777".to_string(),
                Err("boom".to_string()),
            )],
            &stmt(),
        );
        assert_eq!(merged.status.code, StatusCode::Error);
    }

    #[test]
    fn test_all_empty_is_empty() {
        let merged = merge_results(
            vec![
                ("a:7777".to_string(), Ok(host_result(Vec::new()))),
                ("b:7777".to_string(), Ok(host_result(Vec::new()))),
            ],
            &stmt(),
        );
        assert_eq!(merged.status.code, StatusCode::Empty);
    }

    #[test]
    fn test_merged_rows_sorted_and_truncated() {
        let mut stmt = stmt();
        stmt.num_results = 2;
        let a = host_result(vec![
            row("1.1.1.1", "2.2.2.2", 10),
            row("3.3.3.3", "4.4.4.4", 30),
        ]);
        let b = host_result(vec![row("5.5.5.5", "6.6.6.6", 20)]);

        let merged = merge_results(
            vec![("a".to_string(), Ok(a)), ("b".to_string(), Ok(b))],
            &stmt,
        );
        assert_eq!(merged.rows.len(), 2);
        assert_eq!(merged.summary.hits.total, 3);
        assert_eq!(merged.rows[0].attributes.sip.as_deref(), Some("3.3.3.3"));
        assert_eq!(merged.rows[1].attributes.sip.as_deref(), Some("5.5.5.5"));
    }

    #[test]
    fn test_timings_max_and_stats_sum() {
        let mut a = host_result(vec![row("1.1.1.1", "2.2.2.2", 1)]);
        a.summary.timings.query_duration_ns = 500;
        a.summary.stats = Some(DbStats {
            bytes_loaded: 10,
            ..DbStats::default()
        });
        let mut b = host_result(vec![row("3.3.3.3", "4.4.4.4", 1)]);
        b.summary.timings.query_duration_ns = 900;
        b.summary.stats = Some(DbStats {
            bytes_loaded: 7,
            ..DbStats::default()
        });

        let merged = merge_results(
            vec![("a".to_string(), Ok(a)), ("b".to_string(), Ok(b))],
            &stmt(),
        );
        assert_eq!(merged.summary.timings.query_duration_ns, 900);
        assert_eq!(merged.summary.stats.unwrap().bytes_loaded, 17);
    }
}
