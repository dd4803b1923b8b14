//! Flexible time parsing for query arguments, plus time-bin arithmetic.
//!
//! Supported timestamp formats:
//! - ISO 8601: `2016-02-25T21:00:00`
//! - Unix timestamp: `1456428000`
//! - Relative: `-30m`, `-24h`, `-7d`, compound `-1d:2h:15m`
//! - Date+time (UTC): `2016-02-25:21:00` or `2016-02-25:21:00:00`
//! - Time only (current day, UTC): `21:00`
//! - `max` — the open-ended sentinel used by live queries

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Sentinel for an unbounded upper time limit (9999-12-31T23:59:59Z).
pub const MAX_TIME: i64 = 253402300799;

/// The smallest legal time bin (5 minutes).
pub const DEFAULT_BUCKET_SECS: i64 = 300;

/// Target ceiling on the number of bins per 24-hour period when the bin
/// size is computed automatically.
const MAX_BINS_PER_DAY: i64 = 288;

/// Error type for time parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to parse time '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for TimeParseError {}

/// Parses a time expression into a Unix timestamp, relative to now.
pub fn parse_timestamp(input: &str) -> Result<i64, TimeParseError> {
    parse_timestamp_at(input, Utc::now().timestamp())
}

/// Parses a time expression in UTC using `base_ts` as the reference for
/// relative and time-only expressions. Injectable base keeps tests
/// deterministic.
pub fn parse_timestamp_at(input: &str, base_ts: i64) -> Result<i64, TimeParseError> {
    let input = input.trim();

    if input == "max" {
        return Ok(MAX_TIME);
    }

    if let Some(ts) = try_parse_unix(input) {
        return Ok(ts);
    }

    if let Some(delta) = try_parse_relative(input) {
        return base_ts.checked_sub(delta).ok_or_else(|| TimeParseError {
            input: input.to_string(),
            message: "relative time overflow".to_string(),
        });
    }

    if let Some(ts) = try_parse_iso8601(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_date_colon_time(input) {
        return Ok(ts);
    }

    if let Some(ts) = try_parse_time_only(input, base_ts) {
        return Ok(ts);
    }

    Err(TimeParseError {
        input: input.to_string(),
        message: "unrecognized format. Use: ISO 8601 (2016-02-25T21:00:00), \
                  Unix timestamp (1456428000), relative (-30m, -24h, -1d:2h), \
                  date:time (2016-02-25:21:00), time only (21:00), or max"
            .to_string(),
    })
}

fn try_parse_unix(input: &str) -> Option<i64> {
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        input.parse::<i64>().ok()
    } else {
        None
    }
}

/// Parses `-Nd[:Nh:Nm:Ns]` (or any colon-separated chain of duration
/// segments) into the number of seconds to subtract.
fn try_parse_relative(input: &str) -> Option<i64> {
    let rest = input.strip_prefix('-')?;
    if rest.is_empty() {
        return None;
    }
    let mut total: i64 = 0;
    for segment in rest.split(':') {
        let secs = parse_duration_secs(segment).ok()?;
        total = total.checked_add(secs as i64)?;
    }
    Some(total)
}

fn try_parse_iso8601(input: &str) -> Option<i64> {
    if !input.contains('T') {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc).timestamp());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&ndt).timestamp());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M") {
        return Some(Utc.from_utc_datetime(&ndt).timestamp());
    }
    None
}

/// Parses `YYYY-MM-DD:HH:MM` or `YYYY-MM-DD:HH:MM:SS` (UTC).
fn try_parse_date_colon_time(input: &str) -> Option<i64> {
    if input.len() < 11 || !input.contains('-') {
        return None;
    }
    let date_part = &input[..10];
    if !input[10..].starts_with(':') {
        return None;
    }
    let time_part = &input[11..];

    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let time = match time_part.len() {
        5 => NaiveTime::parse_from_str(time_part, "%H:%M").ok()?,
        8 => NaiveTime::parse_from_str(time_part, "%H:%M:%S").ok()?,
        _ => return None,
    };

    Some(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)).timestamp())
}

/// Parses `HH:MM` as that time on the day of `base_ts` (UTC).
fn try_parse_time_only(input: &str, base_ts: i64) -> Option<i64> {
    if input.len() != 5 || input.chars().nth(2) != Some(':') {
        return None;
    }
    let time = NaiveTime::parse_from_str(input, "%H:%M").ok()?;
    let base_date = Utc.timestamp_opt(base_ts, 0).single()?.date_naive();
    Some(
        Utc.from_utc_datetime(&NaiveDateTime::new(base_date, time))
            .timestamp(),
    )
}

/// Parses a duration like `30s`, `5m`, `90m`, `1h30m`, `2d` into seconds.
/// A bare number is taken as seconds.
pub fn parse_duration_secs(input: &str) -> Result<u64, TimeParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TimeParseError {
            input: input.to_string(),
            message: "empty duration".to_string(),
        });
    }
    if input.chars().all(|c| c.is_ascii_digit()) {
        return input.parse::<u64>().map_err(|e| TimeParseError {
            input: input.to_string(),
            message: e.to_string(),
        });
    }

    let mut total: u64 = 0;
    let mut number = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let n: u64 = number.parse().map_err(|_| TimeParseError {
            input: input.to_string(),
            message: format!("missing number before '{}'", c),
        })?;
        number.clear();
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            'w' => 604800,
            _ => {
                return Err(TimeParseError {
                    input: input.to_string(),
                    message: format!("unknown duration unit '{}'", c),
                });
            }
        };
        total = total.saturating_add(n.saturating_mul(unit));
    }
    if !number.is_empty() {
        return Err(TimeParseError {
            input: input.to_string(),
            message: "trailing number without unit".to_string(),
        });
    }
    Ok(total)
}

/// Bins a timestamp to the ceiling of its bin: the result is a multiple of
/// `bucket` and represents flows in `(result - bucket, result]`.
pub fn bin_timestamp(ts: i64, bucket: i64) -> i64 {
    debug_assert!(bucket > 0);
    ts.div_euclid(bucket) * bucket + if ts.rem_euclid(bucket) != 0 { bucket } else { 0 }
}

/// Computes an automatic bin size for a query span: at most 288 bins per
/// 24-hour period, rounded up to a multiple of 5 minutes.
pub fn auto_bucket(first: i64, last: i64) -> i64 {
    let span = (last - first).max(0);
    let raw = span / MAX_BINS_PER_DAY;
    let div_ceil = (raw + DEFAULT_BUCKET_SECS - 1) / DEFAULT_BUCKET_SECS;
    let rounded = div_ceil * DEFAULT_BUCKET_SECS;
    rounded.max(DEFAULT_BUCKET_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: i64 = 1456428000; // 2016-02-25T18:40:00Z

    #[test]
    fn test_unix_timestamp() {
        assert_eq!(parse_timestamp_at("1456428000", BASE).unwrap(), 1456428000);
        assert_eq!(parse_timestamp_at("0", BASE).unwrap(), 0);
    }

    #[test]
    fn test_max_sentinel() {
        assert_eq!(parse_timestamp_at("max", BASE).unwrap(), MAX_TIME);
    }

    #[test]
    fn test_relative_simple() {
        assert_eq!(parse_timestamp_at("-30m", BASE).unwrap(), BASE - 1800);
        assert_eq!(parse_timestamp_at("-24h", BASE).unwrap(), BASE - 86400);
        assert_eq!(parse_timestamp_at("-7d", BASE).unwrap(), BASE - 7 * 86400);
    }

    #[test]
    fn test_relative_compound() {
        assert_eq!(
            parse_timestamp_at("-1d:2h:15m", BASE).unwrap(),
            BASE - 86400 - 7200 - 900
        );
        assert_eq!(
            parse_timestamp_at("-1h30m", BASE).unwrap(),
            BASE - 5400
        );
    }

    #[test]
    fn test_iso8601() {
        let expected = Utc
            .with_ymd_and_hms(2016, 2, 25, 21, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(
            parse_timestamp_at("2016-02-25T21:00:00", BASE).unwrap(),
            expected
        );
        assert_eq!(parse_timestamp_at("2016-02-25T21:00", BASE).unwrap(), expected);
    }

    #[test]
    fn test_date_colon_time() {
        let expected = Utc
            .with_ymd_and_hms(2016, 2, 25, 21, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(parse_timestamp_at("2016-02-25:21:00", BASE).unwrap(), expected);
        assert_eq!(
            parse_timestamp_at("2016-02-25:21:00:00", BASE).unwrap(),
            expected
        );
    }

    #[test]
    fn test_time_only_uses_base_date() {
        let expected = Utc
            .with_ymd_and_hms(2016, 2, 25, 7, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(parse_timestamp_at("07:00", BASE).unwrap(), expected);
    }

    #[test]
    fn test_invalid_formats() {
        assert!(parse_timestamp_at("", BASE).is_err());
        assert!(parse_timestamp_at("yesterday", BASE).is_err());
        assert!(parse_timestamp_at("2016-02-25", BASE).is_err());
        assert!(parse_timestamp_at("-abc", BASE).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_secs("30s").unwrap(), 30);
        assert_eq!(parse_duration_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_secs("1h30m").unwrap(), 5400);
        assert_eq!(parse_duration_secs("2d").unwrap(), 172800);
        assert_eq!(parse_duration_secs("90").unwrap(), 90);
        assert!(parse_duration_secs("5x").is_err());
        assert!(parse_duration_secs("m").is_err());
        assert!(parse_duration_secs("1h30").is_err());
    }

    #[test]
    fn test_bin_timestamp_properties() {
        for &b in &[300i64, 600, 3600] {
            for &t in &[0i64, 1, 299, 300, 301, 1456428000, 1456428001] {
                let binned = bin_timestamp(t, b);
                assert_eq!(binned % b, 0, "t={} b={}", t, b);
                assert!(t <= binned && binned < t + b, "t={} b={} binned={}", t, b, binned);
            }
        }
    }

    #[test]
    fn test_bin_timestamp_exact_multiple_stays() {
        assert_eq!(bin_timestamp(600, 300), 600);
        assert_eq!(bin_timestamp(601, 300), 900);
    }

    #[test]
    fn test_auto_bucket() {
        // 24h span: exactly 300s bins (288 of them).
        assert_eq!(auto_bucket(0, 86400), 300);
        // Short spans clamp to the minimum bucket.
        assert_eq!(auto_bucket(0, 3600), 300);
        // A week: 604800 / 288 = 2100, already a multiple of 300.
        assert_eq!(auto_bucket(0, 604800), 2100);
        // 30 days: 2592000 / 288 = 9000.
        assert_eq!(auto_bucket(0, 2592000), 9000);
    }
}
