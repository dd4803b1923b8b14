//! Row merging, time binning, and truncation.

use std::collections::HashMap;

use crate::results::{Hits, Labels, Row, RowAttributes};
use crate::util::time::bin_timestamp;

/// Merges rows with an equal label ∪ attribute tuple by summing their
/// counters. Output order is unspecified; callers re-sort.
pub fn merge_rows(rows: impl IntoIterator<Item = Row>) -> Vec<Row> {
    let mut map: HashMap<(Labels, RowAttributes), crate::types::counters::Counters> =
        HashMap::new();
    for row in rows {
        map.entry((row.labels, row.attributes))
            .or_default()
            .add(&row.counters);
    }
    map.into_iter()
        .map(|((labels, attributes), counters)| Row {
            labels,
            attributes,
            counters,
        })
        .collect()
}

/// Bins row timestamps to the ceiling of their bin and re-merges rows that
/// became equal. A binned timestamp `ts` represents flows in
/// `(ts - bucket, ts]`.
pub fn bin_rows(rows: Vec<Row>, bucket: i64) -> Vec<Row> {
    let binned = rows.into_iter().map(|mut row| {
        row.labels.timestamp = bin_timestamp(row.labels.timestamp, bucket);
        row
    });
    merge_rows(binned)
}

/// Truncates to the result cap and records pre-/post-truncation counts.
pub fn truncate_rows(rows: &mut Vec<Row>, cap: u64) -> Hits {
    let total = rows.len();
    if (rows.len() as u64) > cap {
        rows.truncate(cap as usize);
    }
    Hits {
        displayed: rows.len(),
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::counters::Counters;

    fn row(sip: &str, ts: i64, bytes: u64) -> Row {
        Row {
            labels: Labels {
                timestamp: ts,
                ..Labels::default()
            },
            attributes: RowAttributes {
                sip: Some(sip.to_string()),
                ..RowAttributes::default()
            },
            counters: Counters::new(bytes, 0, 1, 0),
        }
    }

    #[test]
    fn test_merge_sums_equal_tuples() {
        let merged = merge_rows(vec![row("a", 0, 10), row("a", 0, 5), row("b", 0, 1)]);
        assert_eq!(merged.len(), 2);
        let a = merged
            .iter()
            .find(|r| r.attributes.sip.as_deref() == Some("a"))
            .unwrap();
        assert_eq!(a.counters.bytes_rcvd, 15);
    }

    #[test]
    fn test_bin_rows_merges_within_bucket() {
        // 301 and 599 both bin to 600; 601 bins to 900.
        let binned = bin_rows(
            vec![row("a", 301, 1), row("a", 599, 2), row("a", 601, 4)],
            300,
        );
        assert_eq!(binned.len(), 2);
        let b600 = binned.iter().find(|r| r.labels.timestamp == 600).unwrap();
        assert_eq!(b600.counters.bytes_rcvd, 3);
        let b900 = binned.iter().find(|r| r.labels.timestamp == 900).unwrap();
        assert_eq!(b900.counters.bytes_rcvd, 4);
    }

    #[test]
    fn test_truncate_records_hits() {
        let mut rows = vec![row("a", 0, 1), row("b", 0, 2), row("c", 0, 3)];
        let hits = truncate_rows(&mut rows, 2);
        assert_eq!(hits.displayed, 2);
        assert_eq!(hits.total, 3);
        assert_eq!(rows.len(), 2);

        let mut rows = vec![row("a", 0, 1)];
        let hits = truncate_rows(&mut rows, u64::MAX);
        assert_eq!(hits.displayed, 1);
        assert_eq!(hits.total, 1);
    }
}
