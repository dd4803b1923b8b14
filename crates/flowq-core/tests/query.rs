//! End-to-end query scenarios against a fixture block database.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use flowq_core::db::{BlockEntry, block_file_name, write_blocks};
use flowq_core::engine::{LocalRunner, MemoryProbe};
use flowq_core::query::{Args, QueryError};
use flowq_core::results::{QueryResult, StatusCode};
use flowq_core::types::{Counters, Key};
use tempfile::TempDir;

const FIRST: i64 = 1456428000;
const LAST: i64 = 1456473000;

/// A probe that never trips the watcher.
struct RoomyProbe;

impl MemoryProbe for RoomyProbe {
    fn resident(&self) -> io::Result<u64> {
        Ok(1)
    }
    fn physical_total(&self) -> io::Result<u64> {
        Ok(u64::MAX)
    }
}

/// A probe far over any percentage of physical memory.
struct BreachedProbe;

impl MemoryProbe for BreachedProbe {
    fn resident(&self) -> io::Result<u64> {
        Ok(99)
    }
    fn physical_total(&self) -> io::Result<u64> {
        Ok(100)
    }
}

fn entry(sip: &str, dip: &str, dport: u16, proto: u8, counters: Counters) -> BlockEntry {
    let key = Key::v4(sip.parse().unwrap(), dip.parse().unwrap(), dport, proto);
    BlockEntry {
        key: key.as_bytes().to_vec(),
        counters,
    }
}

/// Two flows whose totals match the reference capture:
///   172.4.12.2 -> 10.11.12.13: 4 949 136 packets, 7 004 484 352 bytes
///   172.8.12.2 -> 10.11.12.14: 1 578 601 packets, 2 094 476 019 bytes
fn write_fixture(db: &Path) {
    let iface_dir = db.join("eth0");
    std::fs::create_dir_all(&iface_dir).unwrap();

    let ts1 = FIRST + 300;
    let ts2 = FIRST + 7500; // a different hour and time bin

    let flow1_a = entry(
        "172.4.12.2",
        "10.11.12.13",
        443,
        6,
        Counters::new(4_000_000_000, 3_000_000_000, 2_949_136, 1_500_000),
    );
    let flow1_b = entry(
        "172.4.12.2",
        "10.11.12.13",
        443,
        6,
        Counters::new(4_484_352, 0, 500_000, 0),
    );
    let flow2 = entry(
        "172.8.12.2",
        "10.11.12.14",
        53,
        17,
        Counters::new(1_094_476_019, 1_000_000_000, 1_078_601, 500_000),
    );

    let hour1 = ts1 - ts1 % 3600;
    write_blocks(
        &iface_dir.join(block_file_name(hour1)),
        &[(ts1, vec![flow1_a, flow2])],
    )
    .unwrap();

    let hour2 = ts2 - ts2 % 3600;
    write_blocks(
        &iface_dir.join(block_file_name(hour2)),
        &[(ts2, vec![flow1_b])],
    )
    .unwrap();
}

fn base_args() -> Args {
    Args {
        query: "sip,dip".to_string(),
        ifaces: "eth0".to_string(),
        first: FIRST.to_string(),
        last: LAST.to_string(),
        format: "json".to_string(),
        ..Args::default()
    }
}

fn run(db: &Path, args: &Args) -> QueryResult {
    let stmt = args.prepare().unwrap();
    let runner = LocalRunner::new(db)
        .with_host("testhost", 42)
        .with_probe(Box::new(RoomyProbe));
    runner.run(&stmt, &AtomicBool::new(false))
}

#[test]
fn test_sip_dip_grouping_matches_fixture() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let result = run(dir.path(), &base_args());
    assert_eq!(result.status.code, StatusCode::Ok);
    assert_eq!(result.rows.len(), 2);

    let flow1 = result
        .rows
        .iter()
        .find(|r| r.attributes.sip.as_deref() == Some("172.4.12.2"))
        .unwrap();
    assert_eq!(flow1.attributes.dip.as_deref(), Some("10.11.12.13"));
    assert_eq!(flow1.counters.sum_packets(), 4_949_136);
    assert_eq!(flow1.counters.sum_bytes(), 7_004_484_352);

    let flow2 = result
        .rows
        .iter()
        .find(|r| r.attributes.sip.as_deref() == Some("172.8.12.2"))
        .unwrap();
    assert_eq!(flow2.attributes.dip.as_deref(), Some("10.11.12.14"));
    assert_eq!(flow2.counters.sum_packets(), 1_578_601);
    assert_eq!(flow2.counters.sum_bytes(), 2_094_476_019);

    // The covered interval reflects the blocks actually processed.
    assert_eq!(result.summary.time_first, FIRST + 300);
    assert_eq!(result.summary.time_last, FIRST + 7500);
    assert_eq!(result.summary.interfaces, vec!["eth0"]);

    // The wire form parses back into an equivalent result.
    let json = serde_json::to_string(&result).unwrap();
    let back: QueryResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
}

#[test]
fn test_contradictory_condition_yields_empty() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.condition = "dport < 100 & dport > 100".to_string();
    let result = run(dir.path(), &args);

    assert_eq!(result.status.code, StatusCode::Empty);
    assert_eq!(result.status.message, "query returned no results");
    assert!(result.rows.is_empty());
    assert!(result.summary.totals.is_zero());
}

#[test]
fn test_sort_by_bytes_descending_sum() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.sort_by = "bytes".to_string();
    args.sum = true;
    let result = run(dir.path(), &args);

    assert!(result.rows.len() >= 2);
    let first = result.rows[0].counters.sum_bytes();
    for row in &result.rows[1..] {
        assert!(first >= row.counters.sum_bytes());
    }
    assert_eq!(result.rows[0].attributes.sip.as_deref(), Some("172.4.12.2"));
}

#[test]
fn test_time_grouping_forces_ascending_unlimited() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.query = "time,sip,dip".to_string();
    args.num_results = 1; // ignored: time queries are uncapped
    let result = run(dir.path(), &args);

    assert_eq!(result.status.code, StatusCode::Ok);
    // Two distinct time bins for flow1 plus one for flow2.
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.summary.hits.displayed, 3);

    let timestamps: Vec<i64> = result.rows.iter().map(|r| r.labels.timestamp).collect();
    let mut sorted = timestamps.clone();
    sorted.sort();
    assert_eq!(timestamps, sorted);

    // Bin boundaries are multiples of the bucket and cover the raw stamps.
    for row in &result.rows {
        assert_eq!(row.labels.timestamp % 300, 0);
    }
}

#[test]
fn test_memory_ceiling_aborts_query() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.max_mem_pct = 1;
    let stmt = args.prepare().unwrap();
    let runner = LocalRunner::new(dir.path()).with_probe(Box::new(BreachedProbe));
    let result = runner.run(&stmt, &AtomicBool::new(false));

    assert_eq!(result.status.code, StatusCode::Error);
    assert!(matches!(
        result.error,
        Some(QueryError::MemoryBreach { .. })
    ));
    assert!(result.rows.is_empty());
}

#[test]
fn test_counter_conservation_on_raw_tuple() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.query = "sip,dip,dport,proto".to_string();
    let result = run(dir.path(), &args);

    let mut row_total = Counters::default();
    for row in &result.rows {
        row_total.add(&row.counters);
    }
    assert_eq!(row_total, result.summary.totals);
    assert_eq!(row_total.sum_packets(), 4_949_136 + 1_578_601);
    assert_eq!(row_total.sum_bytes(), 7_004_484_352 + 2_094_476_019);
}

#[test]
fn test_truncation_is_monotonic() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.num_results = 1;
    let capped = run(dir.path(), &args);
    assert_eq!(capped.rows.len(), 1);
    assert_eq!(capped.summary.hits.total, 2);

    args.num_results = 2;
    let full = run(dir.path(), &args);
    assert_eq!(full.rows.len(), 2);
    // Raising the cap never removes previously displayed rows.
    assert_eq!(capped.rows[0], full.rows[0]);
}

#[test]
fn test_low_mem_mode_yields_identical_result() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let plain = run(dir.path(), &base_args());

    let mut args = base_args();
    args.low_mem = true;
    let frugal = run(dir.path(), &args);

    assert_eq!(frugal.status.code, StatusCode::Ok);
    assert_eq!(frugal.rows, plain.rows);
    assert_eq!(frugal.summary.totals, plain.summary.totals);
    assert_eq!(frugal.summary.hits, plain.summary.hits);
}

#[test]
fn test_hostname_label_from_runner_identity() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.query = "hostname,hostid,sip".to_string();
    let result = run(dir.path(), &args);

    for row in &result.rows {
        assert_eq!(row.labels.hostname, "testhost");
        assert_eq!(row.labels.host_id, 42);
    }
}

#[test]
fn test_iface_label_on_multi_interface_query() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());
    // Second interface with one flow.
    let eth1 = dir.path().join("eth1");
    std::fs::create_dir_all(&eth1).unwrap();
    let ts = FIRST + 600;
    write_blocks(
        &eth1.join(block_file_name(ts - ts % 3600)),
        &[(
            ts,
            vec![entry(
                "192.168.1.1",
                "10.0.0.1",
                22,
                6,
                Counters::new(10, 20, 1, 2),
            )],
        )],
    )
    .unwrap();

    let mut args = base_args();
    args.ifaces = "any".to_string();
    let result = run(dir.path(), &args);

    assert_eq!(result.status.code, StatusCode::Ok);
    let ifaces: std::collections::BTreeSet<&str> = result
        .rows
        .iter()
        .map(|r| r.labels.iface.as_str())
        .collect();
    assert!(ifaces.contains("eth0"));
    assert!(ifaces.contains("eth1"));
    assert_eq!(result.summary.interfaces, vec!["eth0", "eth1"]);
}

#[test]
fn test_missing_interface_reports_db_error() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.ifaces = "eth9".to_string();
    let result = run(dir.path(), &args);

    assert_eq!(result.status.code, StatusCode::Error);
    assert!(matches!(result.error, Some(QueryError::Db { .. })));
}

#[test]
fn test_pre_set_cancellation_returns_promptly() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let stmt = base_args().prepare().unwrap();
    let runner = LocalRunner::new(dir.path()).with_probe(Box::new(RoomyProbe));
    let cancel = Arc::new(AtomicBool::new(true));
    let result = runner.run(&stmt, &cancel);

    assert_eq!(result.status.code, StatusCode::Error);
    assert_eq!(result.error, Some(QueryError::Canceled));
}

#[test]
fn test_condition_filters_single_flow() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    let mut args = base_args();
    args.condition = "dport = 443 & proto = tcp".to_string();
    let result = run(dir.path(), &args);

    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].attributes.sip.as_deref(), Some("172.4.12.2"));
    assert_eq!(result.summary.totals.sum_bytes(), 7_004_484_352);
}

#[test]
fn test_corrupt_block_is_counted_and_skipped() {
    let dir = TempDir::new().unwrap();
    write_fixture(dir.path());

    // Corrupt the second block file's frame bytes, leaving its index intact.
    let iface_dir = dir.path().join("eth0");
    let ts2 = FIRST + 7500;
    let path = iface_dir.join(block_file_name(ts2 - ts2 % 3600));
    let mut data = std::fs::read(&path).unwrap();
    // First frame starts right after the 16-byte header and one 24-byte
    // index entry; flipping its leading bytes breaks the zstd magic.
    for b in &mut data[40..44] {
        *b ^= 0xff;
    }
    std::fs::write(&path, &data).unwrap();

    let result = run(dir.path(), &base_args());
    assert_eq!(result.status.code, StatusCode::Ok);
    let stats = result.summary.stats.unwrap();
    assert_eq!(stats.blocks_corrupted, 1);
    assert_eq!(stats.blocks_processed, 1);
    // The intact block still contributes both flows.
    assert_eq!(result.rows.len(), 2);
}
