//! Reverse-DNS enrichment of result rows.
//!
//! Takes the top rows' IPs, deduplicates them, and issues parallel reverse
//! lookups under one overall deadline. Lookups that miss the deadline are
//! abandoned; whatever resolved in time is substituted into the rows. The
//! enricher never fails the query; failures surface as unresolved IPs.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::query::DnsConfig;
use crate::results::Row;

/// A reverse resolver. Implementations must be shareable across the
/// lookup worker threads.
pub trait ReverseResolver: Send + Sync + 'static {
    /// Returns the first domain name for `ip`, if any.
    fn reverse(&self, ip: IpAddr) -> Option<String>;
}

/// Production resolver backed by the system DNS configuration.
pub struct SystemResolver {
    inner: hickory_resolver::Resolver,
}

impl SystemResolver {
    pub fn from_system() -> io::Result<Self> {
        let inner = hickory_resolver::Resolver::from_system_conf().map_err(io::Error::other)?;
        Ok(Self { inner })
    }
}

impl ReverseResolver for SystemResolver {
    fn reverse(&self, ip: IpAddr) -> Option<String> {
        let lookup = self.inner.reverse_lookup(ip).ok()?;
        lookup
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
    }
}

/// Resolves the sip/dip values of the top `cfg.max_rows` rows in place.
/// Returns the wall time the phase took, for the summary.
pub fn resolve_rows(
    resolver: Arc<dyn ReverseResolver>,
    rows: &mut [Row],
    cfg: &DnsConfig,
) -> Duration {
    let started = Instant::now();
    let top = rows.len().min(cfg.max_rows);

    let mut ips: HashSet<IpAddr> = HashSet::new();
    for row in rows[..top].iter() {
        for value in [&row.attributes.sip, &row.attributes.dip].into_iter().flatten() {
            if let Ok(ip) = value.parse::<IpAddr>()
                && !ip.is_unspecified()
            {
                ips.insert(ip);
            }
        }
    }
    if ips.is_empty() {
        return started.elapsed();
    }

    let expected = ips.len();
    let (tx, rx) = mpsc::channel::<(IpAddr, Option<String>)>();
    for ip in ips {
        let tx = tx.clone();
        let resolver = resolver.clone();
        // Detached on purpose: a lookup that outlives the deadline keeps
        // running in the background and its send lands in a closed channel.
        std::thread::spawn(move || {
            let name = resolver.reverse(ip);
            let _ = tx.send((ip, name));
        });
    }
    drop(tx);

    let deadline = started + cfg.timeout;
    let mut names: HashMap<String, String> = HashMap::new();
    let mut received = 0;
    while received < expected {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            warn!(resolved = names.len(), expected, "reverse DNS deadline hit");
            break;
        };
        match rx.recv_timeout(remaining) {
            Ok((ip, Some(name))) => {
                names.insert(ip.to_string(), name);
                received += 1;
            }
            Ok((_, None)) => received += 1,
            Err(_) => break,
        }
    }

    for row in rows[..top].iter_mut() {
        for value in [&mut row.attributes.sip, &mut row.attributes.dip]
            .into_iter()
            .flatten()
        {
            if let Some(name) = names.get(value.as_str()) {
                *value = name.clone();
            }
        }
    }

    debug!(resolved = names.len(), expected, "reverse DNS enrichment done");
    started.elapsed()
}
