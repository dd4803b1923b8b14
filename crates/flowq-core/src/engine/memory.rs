//! Cooperative memory guard.
//!
//! The heap watcher samples resident memory once per second and trips a
//! single error when occupancy crosses `max_mem_pct × physical memory`.
//! The query path treats the trip as fatal: it cancels the work context,
//! drains the aggregation channel, drops the in-flight maps, and purges
//! jemalloc arenas so the pages actually return to the OS.
//!
//! The probe sits behind a trait so tests can inject a fake reader and
//! drive the watcher deterministically.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::query::QueryError;

/// Reads process and machine memory figures.
pub trait MemoryProbe: Send + 'static {
    /// Resident heap occupancy of this process, released pages excluded.
    fn resident(&self) -> io::Result<u64>;
    /// Total physical memory of the machine.
    fn physical_total(&self) -> io::Result<u64>;
}

/// Production probe: jemalloc statistics for residency, `/proc/meminfo`
/// for the physical total.
pub struct SystemProbe {
    meminfo: PathBuf,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            meminfo: PathBuf::from("/proc/meminfo"),
        }
    }

    /// Overrides the meminfo path (for testing).
    pub fn with_meminfo(meminfo: impl Into<PathBuf>) -> Self {
        Self {
            meminfo: meminfo.into(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemProbe {
    fn resident(&self) -> io::Result<u64> {
        jemalloc_resident()
    }

    fn physical_total(&self) -> io::Result<u64> {
        let content = std::fs::read_to_string(&self.meminfo)?;
        parse_meminfo_total(&content)
            .ok_or_else(|| io::Error::other("MemTotal not found in meminfo"))
    }
}

/// Extracts MemTotal (bytes) from `/proc/meminfo` content.
fn parse_meminfo_total(content: &str) -> Option<u64> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_env = "msvc"))]
fn jemalloc_resident() -> io::Result<u64> {
    // SAFETY: mallctl is called with valid stat names and correctly sized
    // out-parameters. The epoch advance refreshes the cached statistics.
    unsafe {
        let mut epoch: u64 = 1;
        let epoch_ptr = (&raw mut epoch).cast();
        let mut epoch_len = std::mem::size_of::<u64>();
        let rc = tikv_jemalloc_sys::mallctl(
            c"epoch".as_ptr().cast(),
            epoch_ptr,
            &mut epoch_len,
            epoch_ptr,
            std::mem::size_of::<u64>(),
        );
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }

        let mut resident: usize = 0;
        let mut len = std::mem::size_of::<usize>();
        let rc = tikv_jemalloc_sys::mallctl(
            c"stats.resident".as_ptr().cast(),
            (&raw mut resident).cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        );
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(resident as u64)
    }
}

#[cfg(target_env = "msvc")]
fn jemalloc_resident() -> io::Result<u64> {
    Err(io::Error::other("jemalloc statistics unavailable"))
}

/// Releases unused memory back to the operating system.
/// Purges dirty pages from ALL jemalloc arenas (MALLCTL_ARENAS_ALL =
/// 4096), not just arena 0, so worker-thread allocations are covered too.
pub fn release_memory_to_os() {
    #[cfg(not(target_env = "msvc"))]
    // SAFETY: arena.4096.purge takes no in/out parameters.
    unsafe {
        tikv_jemalloc_sys::mallctl(
            c"arena.4096.purge".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

/// One-shot ceiling check, used before a query starts so an already
/// over-budget process never begins reading blocks.
pub fn check_limit(probe: &dyn MemoryProbe, max_mem_pct: u32) -> Result<(), QueryError> {
    let limit = match probe.physical_total() {
        Ok(total) => total / 100 * max_mem_pct as u64,
        Err(_) => return Ok(()),
    };
    match probe.resident() {
        Ok(resident) if resident > limit => Err(QueryError::MemoryBreach { resident, limit }),
        _ => Ok(()),
    }
}

/// Default sampling interval of the heap watcher.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// A running heap-watcher task. Stopped via [`stop`](Self::stop) when the
/// query completes normally; dropping it stops it too.
pub struct HeapWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HeapWatcher {
    /// Spawns the watcher. On breach it sends a single
    /// [`QueryError::MemoryBreach`] on `err_tx` and exits.
    pub fn spawn(
        probe: Box<dyn MemoryProbe>,
        max_mem_pct: u32,
        interval: Duration,
        err_tx: SyncSender<QueryError>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            let limit = match probe.physical_total() {
                Ok(total) => total / 100 * max_mem_pct as u64,
                Err(e) => {
                    warn!(error = %e, "heap watcher disabled: cannot read physical memory");
                    return;
                }
            };
            debug!(limit, max_mem_pct, "heap watcher started");

            while !stop_flag.load(Ordering::Relaxed) {
                match probe.resident() {
                    Ok(resident) if resident > limit => {
                        warn!(resident, limit, "memory ceiling breached");
                        let _ = err_tx.try_send(QueryError::MemoryBreach { resident, limit });
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "failed to sample resident memory"),
                }

                // Sleep in slices so stop requests are honoured promptly.
                let slice = Duration::from_millis(100);
                let mut remaining = interval;
                while remaining > Duration::ZERO && !stop_flag.load(Ordering::Relaxed) {
                    let nap = remaining.min(slice);
                    std::thread::sleep(nap);
                    remaining = remaining.saturating_sub(nap);
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signals the watcher to exit and joins it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeapWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::mpsc;

    struct FakeProbe {
        resident: Arc<AtomicU64>,
        total: u64,
    }

    impl MemoryProbe for FakeProbe {
        fn resident(&self) -> io::Result<u64> {
            Ok(self.resident.load(Ordering::Relaxed))
        }
        fn physical_total(&self) -> io::Result<u64> {
            Ok(self.total)
        }
    }

    #[test]
    fn test_parse_meminfo_total() {
        let content = "MemTotal:       16384000 kB\nMemFree:        1024 kB\n";
        assert_eq!(parse_meminfo_total(content), Some(16384000 * 1024));
        assert_eq!(parse_meminfo_total("MemFree: 1 kB\n"), None);
    }

    #[test]
    fn test_watcher_trips_on_breach() {
        let resident = Arc::new(AtomicU64::new(90));
        let probe = FakeProbe {
            resident: resident.clone(),
            total: 100,
        };
        let (tx, rx) = mpsc::sync_channel(1);
        // Limit = 100 / 100 * 50 = 50; resident 90 breaches immediately.
        let watcher = HeapWatcher::spawn(Box::new(probe), 50, Duration::from_millis(10), tx);

        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(err, QueryError::MemoryBreach { resident: 90, limit: 50 }));
        watcher.stop();
    }

    #[test]
    fn test_watcher_stops_quietly_below_limit() {
        let probe = FakeProbe {
            resident: Arc::new(AtomicU64::new(10)),
            total: 100,
        };
        let (tx, rx) = mpsc::sync_channel(1);
        let watcher = HeapWatcher::spawn(Box::new(probe), 50, Duration::from_millis(10), tx);
        std::thread::sleep(Duration::from_millis(50));
        watcher.stop();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_check_limit() {
        let probe = FakeProbe {
            resident: Arc::new(AtomicU64::new(90)),
            total: 100,
        };
        assert!(check_limit(&probe, 95).is_ok());
        assert!(matches!(
            check_limit(&probe, 50),
            Err(QueryError::MemoryBreach { .. })
        ));
    }

    #[test]
    fn test_meminfo_probe_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, "MemTotal:       8192 kB\n").unwrap();
        let probe = SystemProbe::with_meminfo(&path);
        assert_eq!(probe.physical_total().unwrap(), 8192 * 1024);
    }
}
