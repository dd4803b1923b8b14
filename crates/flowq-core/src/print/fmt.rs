//! Pure formatting helpers for the table printers.

use chrono::{TimeZone, Utc};

/// Format a byte count as a human-readable size: `"6.5 GiB"`, `"512 B"`.
pub fn format_bytes(bytes: u64) -> String {
    let f = bytes as f64;
    if bytes >= 1024 * 1024 * 1024 * 1024 {
        format!("{:.1} TiB", f / (1024.0 * 1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1} GiB", f / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", f / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", f / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a packet count with decimal suffixes: `"4.95 M"`, `"1.58 M"`,
/// `"812.00 k"`.
pub fn format_count(n: u64) -> String {
    let f = n as f64;
    if n >= 1_000_000_000 {
        format!("{:.2} G", f / 1e9)
    } else if n >= 1_000_000 {
        format!("{:.2} M", f / 1e6)
    } else if n >= 1_000 {
        format!("{:.2} k", f / 1e3)
    } else {
        format!("{}", n)
    }
}

/// Format a percentage with two decimals.
pub fn format_pct(pct: f64) -> String {
    format!("{:.2}", pct)
}

/// Format a Unix timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_timestamp(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

/// Format a nanosecond duration: `"873µs"`, `"8ms"`, `"1.24s"`.
pub fn format_duration_ns(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.2}s", ns as f64 / 1e9)
    } else if ns >= 1_000_000 {
        format!("{}ms", ns / 1_000_000)
    } else if ns >= 1_000 {
        format!("{}µs", ns / 1_000)
    } else {
        format!("{}ns", ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(7004484352), "6.5 GiB");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(4_949_136), "4.95 M");
        assert_eq!(format_count(1_500), "1.50 k");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1456428000), "2016-02-25 18:40:00");
    }

    #[test]
    fn test_format_duration_ns() {
        assert_eq!(format_duration_ns(500), "500ns");
        assert_eq!(format_duration_ns(8_000_000), "8ms");
        assert_eq!(format_duration_ns(1_240_000_000), "1.24s");
    }
}
