//! Row ordering.
//!
//! The primary sort key is bytes, packets, or time per the statement; rows
//! with an equal primary key fall back to a lexicographic compare of their
//! label and attribute tuple. Descending order reverses the whole compare,
//! so the tie-break direction flips with the ascending flag.

use std::cmp::Ordering;

use crate::query::{Direction, SortOrder};
use crate::results::Row;

/// Sorts rows in place by the requested order.
pub fn sort_rows(rows: &mut [Row], sort_by: SortOrder, direction: Direction, ascending: bool) {
    rows.sort_unstable_by(|a, b| {
        let ord = compare(a, b, sort_by, direction);
        if ascending { ord } else { ord.reverse() }
    });
}

fn compare(a: &Row, b: &Row, sort_by: SortOrder, direction: Direction) -> Ordering {
    let primary = match sort_by {
        SortOrder::Bytes => a.counters.bytes(direction).cmp(&b.counters.bytes(direction)),
        SortOrder::Packets => a
            .counters
            .packets(direction)
            .cmp(&b.counters.packets(direction)),
        SortOrder::Time => a.labels.timestamp.cmp(&b.labels.timestamp),
    };
    primary.then_with(|| tuple_compare(a, b))
}

/// Label/attribute tuple compare used as the tie-break.
fn tuple_compare(a: &Row, b: &Row) -> Ordering {
    a.labels
        .timestamp
        .cmp(&b.labels.timestamp)
        .then_with(|| a.labels.iface.cmp(&b.labels.iface))
        .then_with(|| a.labels.hostname.cmp(&b.labels.hostname))
        .then_with(|| a.labels.host_id.cmp(&b.labels.host_id))
        .then_with(|| a.attributes.sip.cmp(&b.attributes.sip))
        .then_with(|| a.attributes.dip.cmp(&b.attributes.dip))
        .then_with(|| a.attributes.dport.cmp(&b.attributes.dport))
        .then_with(|| a.attributes.proto.cmp(&b.attributes.proto))
}
