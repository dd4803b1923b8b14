//! Streaming aggregation of partial flow maps.
//!
//! A single consumer reads partial maps until the channel closes. Keys move
//! from the partial into the final map (zero-copy); counter addition is
//! commutative, so the outcome is independent of worker count and block
//! processing order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;

use crate::engine::memory::release_memory_to_os;
use crate::engine::work_manager::{FlowMap, PartialMap, new_flow_map};
use crate::query::QueryError;
use crate::types::counters::Counters;

/// Outcome of a completed aggregation.
#[derive(Debug)]
pub struct AggregateResult {
    pub hostname: String,
    pub host_id: u64,
    /// Final maps, one per interface when the iface label is selected,
    /// otherwise a single map under the empty name.
    pub by_iface: Vec<(String, FlowMap)>,
    /// Global totals over all aggregated entries (the percentage base).
    pub totals: Counters,
}

impl AggregateResult {
    pub fn is_empty(&self) -> bool {
        self.by_iface.iter().all(|(_, m)| m.is_empty())
    }
}

/// Consumes partial maps until the channel closes.
///
/// The first payload fixes the host identity; a later payload with
/// different metadata fails the single-host invariant. With
/// `split_ifaces`, entries stay separated per interface so the iface label
/// can appear in rows. With `low_mem`, each consumed partial's pages are
/// handed back to the OS before the next one is folded, so resident growth
/// per step stays bounded by the largest partial. On cancellation the
/// channel is drained without folding so producers never block on a full
/// channel.
pub fn aggregate(
    rx: Receiver<PartialMap>,
    split_ifaces: bool,
    low_mem: bool,
    cancel: &AtomicBool,
) -> Result<AggregateResult, QueryError> {
    let mut maps: HashMap<String, FlowMap> = HashMap::new();
    let mut totals = Counters::default();
    let mut identity: Option<(String, u64)> = None;
    let mut failure: Option<QueryError> = None;

    while let Ok(partial) = rx.recv() {
        if failure.is_some() || cancel.load(Ordering::Relaxed) {
            // Drain mode: keep receiving so producers can finish promptly.
            continue;
        }

        if let Some(err) = partial.err {
            failure = Some(err);
            continue;
        }

        match &identity {
            None => identity = Some((partial.hostname.clone(), partial.host_id)),
            Some((hostname, host_id)) => {
                if *hostname != partial.hostname || *host_id != partial.host_id {
                    failure = Some(QueryError::MismatchingHosts {
                        expected: format!("{} ({})", hostname, host_id),
                        got: format!("{} ({})", partial.hostname, partial.host_id),
                    });
                    continue;
                }
            }
        }

        let map = maps
            .entry(if split_ifaces {
                partial.iface
            } else {
                String::new()
            })
            .or_insert_with(new_flow_map);
        for (key, counters) in partial.data {
            totals.add(&counters);
            map.entry(key).or_default().add(&counters);
        }
        // The partial's backing store is gone at this point; in low-memory
        // mode its pages go back to the OS before the next fold.
        if low_mem {
            release_memory_to_os();
        }
    }

    if let Some(err) = failure {
        return Err(err);
    }
    if cancel.load(Ordering::Relaxed) {
        return Err(QueryError::Canceled);
    }

    let (hostname, host_id) = identity.unwrap_or_default();
    let mut by_iface: Vec<(String, FlowMap)> = maps.into_iter().collect();
    by_iface.sort_by(|(a, _), (b, _)| a.cmp(b));

    Ok(AggregateResult {
        hostname,
        host_id,
        by_iface,
        totals,
    })
}
