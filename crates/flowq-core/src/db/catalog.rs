//! Partition catalog: locating interface directories and the block files
//! that intersect a query's time range.
//!
//! Layout: `<db_root>/<iface>/flows_YYYY-MM-DD_HH.blk`, one directory per
//! capture interface, one file per hour. The filename gives a coarse
//! pre-filter; the per-file index narrows down to individual blocks.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeZone, Utc};

use crate::db::block::BlockFile;
use crate::types::counters::Counters;

/// All block frames of one file that a query needs to read.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub path: PathBuf,
    /// (frame index, block timestamp), ascending.
    pub frames: Vec<(usize, i64)>,
}

/// Lists the interface partitions present in the database.
pub fn interfaces(db_root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(db_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Builds the file name for the hour containing `timestamp`.
pub fn block_file_name(timestamp: i64) -> String {
    let dt = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
    format!("flows_{}.blk", dt.format("%Y-%m-%d_%H"))
}

/// Parses the hour start from a file name of the form
/// `flows_YYYY-MM-DD_HH.blk`. Files that do not match are ignored.
fn parse_hour_from_filename(filename: &str) -> Option<i64> {
    let stem = filename.strip_prefix("flows_")?.strip_suffix(".blk")?;
    let (date_part, hour_part) = stem.rsplit_once('_')?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let hour: u32 = hour_part.parse().ok()?;
    if hour > 23 {
        return None;
    }
    let dt = date.and_hms_opt(hour, 0, 0)?;
    Some(Utc.from_utc_datetime(&dt).timestamp())
}

/// Enumerates the work units of one interface whose blocks intersect
/// `[first, last]`. Opens only headers and index tables.
pub fn blocks_in_range(
    db_root: &Path,
    iface: &str,
    first: i64,
    last: i64,
) -> io::Result<Vec<WorkUnit>> {
    let dir = db_root.join(iface);
    let mut candidates: Vec<(i64, PathBuf)> = Vec::new();

    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(hour_start) = parse_hour_from_filename(name) else {
            continue;
        };
        if hour_start <= last && hour_start + 3599 >= first {
            candidates.push((hour_start, path));
        }
    }
    candidates.sort();

    let mut units = Vec::new();
    for (_, path) in candidates {
        let file = BlockFile::open(&path)?;
        let frames: Vec<(usize, i64)> = file
            .timestamps()
            .into_iter()
            .enumerate()
            .filter(|(_, ts)| *ts >= first && *ts <= last)
            .collect();
        if !frames.is_empty() {
            units.push(WorkUnit { path, frames });
        }
    }

    Ok(units)
}

/// Traffic summary of one interface partition, used by the `list` command.
#[derive(Debug, Clone, Default)]
pub struct IfaceSummary {
    pub iface: String,
    pub blocks: usize,
    pub first: i64,
    pub last: i64,
    pub totals: Counters,
}

/// Scans a whole interface partition and sums its traffic.
pub fn iface_summary(db_root: &Path, iface: &str) -> io::Result<IfaceSummary> {
    let mut summary = IfaceSummary {
        iface: iface.to_string(),
        first: i64::MAX,
        ..IfaceSummary::default()
    };

    for unit in blocks_in_range(db_root, iface, 0, i64::MAX)? {
        let file = BlockFile::open(&unit.path)?;
        for (frame, ts) in &unit.frames {
            summary.blocks += 1;
            summary.first = summary.first.min(*ts);
            summary.last = summary.last.max(*ts);
            let Ok(entries) = file.read_block(*frame) else {
                continue;
            };
            for entry in entries {
                summary.totals.add(&entry.counters);
            }
        }
    }

    if summary.blocks == 0 {
        summary.first = 0;
    }
    Ok(summary)
}
