//! Argument validation and planning.
//!
//! [`Args::prepare`] validates every field, resolves defaults, and produces
//! an immutable [`Statement`], the execution plan shared by the local and
//! distributed runners. Validation never stops at the first failure: all
//! offending fields are reported at once.

use std::time::Duration;

use regex::Regex;

use crate::query::args::Args;
use crate::query::errors::{ArgsError, DetailError};
use crate::types::attributes::{Attribute, LabelSelector, parse_query_type};
use crate::types::condition::{self, Node};
use crate::util::time::{
    DEFAULT_BUCKET_SECS, MAX_TIME, auto_bucket, parse_duration_secs, parse_timestamp_at,
};

/// Sentinel for "no result cap" (forced by time-grouped queries).
pub const UNLIMITED_RESULTS: u64 = u64::MAX;

/// Default lookback when `first` is not given.
const DEFAULT_LOOKBACK_SECS: i64 = 30 * 86400;

/// Traffic direction the query accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    Sum,
    Both,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::Sum => "sum",
            Direction::Both => "both",
        };
        f.write_str(s)
    }
}

/// Primary sort order of the result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Bytes,
    Packets,
    Time,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SortOrder::Bytes => "bytes",
            SortOrder::Packets => "packets",
            SortOrder::Time => "time",
        };
        f.write_str(s)
    }
}

/// Output format of the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Txt,
    Csv,
    Json,
}

/// Resolved reverse-DNS settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsConfig {
    pub timeout: Duration,
    pub max_rows: usize,
}

/// Which interface partitions a query touches.
#[derive(Debug, Clone)]
pub enum IfaceSelection {
    /// All interfaces present in the database.
    All,
    List(Vec<String>),
    Pattern(Regex),
}

impl IfaceSelection {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            IfaceSelection::All => true,
            IfaceSelection::List(names) => names.iter().any(|n| n == name),
            IfaceSelection::Pattern(re) => re.is_match(name),
        }
    }
}

/// The immutable, validated execution plan.
#[derive(Debug, Clone)]
pub struct Statement {
    pub ifaces: IfaceSelection,
    pub attributes: Vec<Attribute>,
    pub label_selector: LabelSelector,
    pub condition: Option<Node>,
    /// Canonical tokenised condition, echoed in results.
    pub condition_echo: String,
    pub direction: Direction,
    pub sort_by: SortOrder,
    pub ascending: bool,
    pub first: i64,
    pub last: i64,
    pub num_results: u64,
    pub format: Format,
    pub dns: Option<DnsConfig>,
    pub max_mem_pct: u32,
    pub low_mem: bool,
    pub keepalive: Option<Duration>,
    pub live: bool,
    /// Time-bin width in seconds when the `time` label is selected.
    pub bucket: Option<i64>,
    pub caller: String,
}

impl Statement {
    /// Attribute names echoed in the result's query section.
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if self.label_selector.timestamp {
            names.push("time".to_string());
        }
        if self.label_selector.iface {
            names.push("iface".to_string());
        }
        if self.label_selector.hostname {
            names.push("hostname".to_string());
        }
        if self.label_selector.host_id {
            names.push("hostid".to_string());
        }
        names.extend(self.attributes.iter().map(|a| a.name().to_string()));
        names
    }
}

/// Valid characters of an interface name.
fn valid_iface_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

impl Args {
    /// Validates the arguments against the current wall clock.
    pub fn prepare(&self) -> Result<Statement, ArgsError> {
        self.prepare_at(chrono::Utc::now().timestamp())
    }

    /// Validates the arguments, resolving relative times against `now`.
    /// Collects ALL validation failures before returning.
    pub fn prepare_at(&self, now: i64) -> Result<Statement, ArgsError> {
        let mut details: Vec<DetailError> = Vec::new();

        // Attributes
        let (attributes, mut label_selector) = match parse_query_type(&self.query) {
            Ok((attrs, sel)) => {
                if attrs.is_empty() && !sel.any() {
                    details.push(DetailError::new(
                        "query",
                        &self.query,
                        "attribute list must not be empty",
                    ));
                }
                (attrs, sel)
            }
            Err(e) => {
                details.push(DetailError::new("query", &self.query, e.to_string()));
                (Vec::new(), LabelSelector::default())
            }
        };

        // Interfaces
        let ifaces = self.parse_ifaces(&mut label_selector, &mut details);

        // Format
        let format = match self.format.as_str() {
            "txt" => Format::Txt,
            "csv" => Format::Csv,
            "json" => Format::Json,
            other => {
                details.push(DetailError::new(
                    "format",
                    other,
                    "must be one of: txt, csv, json",
                ));
                Format::Txt
            }
        };

        // Sort order; a time-grouped query is forced to ascending time
        // order with no result cap.
        let mut sort_by = match self.sort_by.as_str() {
            "bytes" => SortOrder::Bytes,
            "packets" => SortOrder::Packets,
            "time" => SortOrder::Time,
            other => {
                details.push(DetailError::new(
                    "sort_by",
                    other,
                    "must be one of: bytes, packets, time",
                ));
                SortOrder::Bytes
            }
        };
        let mut ascending = self.sort_ascending;
        let mut num_results = self.num_results;
        if label_selector.timestamp {
            sort_by = SortOrder::Time;
            ascending = true;
            num_results = UNLIMITED_RESULTS;
        } else if num_results == 0 {
            details.push(DetailError::new("num_results", "0", "must be > 0"));
        }

        // Time range
        let first = if self.first.is_empty() {
            Ok(now - DEFAULT_LOOKBACK_SECS)
        } else {
            parse_timestamp_at(&self.first, now)
        };
        let last = if self.last.is_empty() {
            Ok(now)
        } else {
            parse_timestamp_at(&self.last, now)
        };
        if let Err(e) = &first {
            details.push(DetailError::new("first", &self.first, e.message.clone()));
        }
        if let Err(e) = &last {
            details.push(DetailError::new("last", &self.last, e.message.clone()));
        }
        let (first, last) = (first.unwrap_or(0), last.unwrap_or(now));
        if first > last {
            details.push(DetailError::new(
                "first",
                format!("{} > {}", first, last),
                "first must not be after last",
            ));
        }
        if self.live && last != MAX_TIME {
            details.push(DetailError::new(
                "live",
                &self.last,
                "live queries require an unbounded last (use 'max')",
            ));
        }

        // Direction; in+out from an external caller coerces to sum, which
        // the plan echo surfaces.
        let direction = if self.sum {
            Direction::Sum
        } else if self.in_ && self.out && self.caller == "external" {
            Direction::Sum
        } else if self.in_ && !self.out {
            Direction::In
        } else if self.out && !self.in_ {
            Direction::Out
        } else {
            Direction::Both
        };

        // DNS
        let dns = if self.dns_resolution.enabled {
            if self.dns_resolution.timeout == 0 {
                details.push(DetailError::new(
                    "dns_resolution.timeout",
                    "0",
                    "must be > 0",
                ));
            }
            if self.dns_resolution.max_rows == 0 {
                details.push(DetailError::new(
                    "dns_resolution.max_rows",
                    "0",
                    "must be > 0",
                ));
            }
            Some(DnsConfig {
                timeout: Duration::from_secs(self.dns_resolution.timeout),
                max_rows: self.dns_resolution.max_rows,
            })
        } else {
            None
        };

        // Condition
        let (condition, condition_echo) = if self.condition.trim().is_empty() {
            (None, String::new())
        } else {
            match condition::parse(&self.condition) {
                Ok(node) => {
                    let echo = node.canonical();
                    (Some(node), echo)
                }
                Err(e) => {
                    details.push(DetailError::new("condition", &self.condition, e.to_string()));
                    (None, String::new())
                }
            }
        };

        // Memory ceiling
        if self.max_mem_pct == 0 || self.max_mem_pct > 100 {
            details.push(DetailError::new(
                "max_mem_pct",
                self.max_mem_pct.to_string(),
                "must be in (0, 100]",
            ));
        }

        // Time resolution
        let bucket = if !label_selector.timestamp {
            None
        } else if self.time_resolution.is_empty() || self.time_resolution == "auto" {
            Some(auto_bucket(first, last.min(now)))
        } else {
            match parse_duration_secs(&self.time_resolution) {
                Ok(secs) => {
                    let secs = secs as i64;
                    if secs < DEFAULT_BUCKET_SECS || secs % DEFAULT_BUCKET_SECS != 0 {
                        details.push(DetailError::new(
                            "time_resolution",
                            &self.time_resolution,
                            "must be at least 5m and a multiple of 5m",
                        ));
                        None
                    } else {
                        Some(secs)
                    }
                }
                Err(e) => {
                    details.push(DetailError::new(
                        "time_resolution",
                        &self.time_resolution,
                        e.message,
                    ));
                    None
                }
            }
        };

        if !details.is_empty() {
            return Err(ArgsError::new(details));
        }

        Ok(Statement {
            ifaces,
            attributes,
            label_selector,
            condition,
            condition_echo,
            direction,
            sort_by,
            ascending,
            first,
            last,
            num_results,
            format,
            dns,
            max_mem_pct: self.max_mem_pct,
            low_mem: self.low_mem,
            keepalive: (self.keepalive > 0).then(|| Duration::from_secs(self.keepalive)),
            live: self.live,
            bucket,
            caller: self.caller.clone(),
        })
    }

    fn parse_ifaces(
        &self,
        selector: &mut LabelSelector,
        details: &mut Vec<DetailError>,
    ) -> IfaceSelection {
        let spec = self.ifaces.trim();
        if spec.is_empty() {
            details.push(DetailError::new(
                "ifaces",
                "",
                "interface list must not be empty",
            ));
            return IfaceSelection::All;
        }
        if spec == "any" {
            selector.iface = true;
            return IfaceSelection::All;
        }
        if spec.len() > 1 && spec.starts_with('/') && spec.ends_with('/') {
            selector.iface = true;
            match Regex::new(&spec[1..spec.len() - 1]) {
                Ok(re) => return IfaceSelection::Pattern(re),
                Err(e) => {
                    details.push(DetailError::new("ifaces", spec, e.to_string()));
                    return IfaceSelection::All;
                }
            }
        }

        let mut names: Vec<String> = Vec::new();
        for name in spec.split(',') {
            let name = name.trim();
            if !valid_iface_name(name) {
                details.push(DetailError::new(
                    "ifaces",
                    name,
                    "invalid interface name",
                ));
                continue;
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        if names.len() > 1 {
            selector.iface = true;
        }
        IfaceSelection::List(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1456473000;

    fn base_args() -> Args {
        Args {
            query: "sip,dip".to_string(),
            ifaces: "eth0".to_string(),
            first: "1456428000".to_string(),
            last: "1456473000".to_string(),
            ..Args::default()
        }
    }

    #[test]
    fn test_minimal_valid_plan() {
        let stmt = base_args().prepare_at(NOW).unwrap();
        assert_eq!(stmt.attributes.len(), 2);
        assert_eq!(stmt.first, 1456428000);
        assert_eq!(stmt.last, 1456473000);
        assert_eq!(stmt.direction, Direction::Both);
        assert_eq!(stmt.sort_by, SortOrder::Bytes);
        assert_eq!(stmt.num_results, 1000);
        assert!(stmt.condition.is_none());
        assert!(stmt.bucket.is_none());
    }

    #[test]
    fn test_all_failures_reported_at_once() {
        let args = Args {
            query: "sip,bogus".to_string(),
            ifaces: "eth 0".to_string(),
            format: "xml".to_string(),
            sort_by: "size".to_string(),
            num_results: 0,
            max_mem_pct: 150,
            condition: "dport <".to_string(),
            ..Args::default()
        };
        let err = args.prepare_at(NOW).unwrap_err();
        let fields: Vec<&str> = err.details.iter().map(|d| d.field.as_str()).collect();
        for f in [
            "query",
            "ifaces",
            "format",
            "sort_by",
            "num_results",
            "max_mem_pct",
            "condition",
        ] {
            assert!(fields.contains(&f), "missing detail for {}: {:?}", f, fields);
        }
        assert_eq!(err.code, 422);
    }

    #[test]
    fn test_time_attribute_forces_time_sort() {
        let mut args = base_args();
        args.query = "time,sip,dip".to_string();
        args.sort_by = "bytes".to_string();
        args.num_results = 5;
        let stmt = args.prepare_at(NOW).unwrap();
        assert_eq!(stmt.sort_by, SortOrder::Time);
        assert!(stmt.ascending);
        assert_eq!(stmt.num_results, UNLIMITED_RESULTS);
        assert!(stmt.bucket.is_some());
    }

    #[test]
    fn test_iface_any_and_multi_force_label() {
        let mut args = base_args();
        args.ifaces = "any".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        assert!(stmt.label_selector.iface);
        assert!(matches!(stmt.ifaces, IfaceSelection::All));

        let mut args = base_args();
        args.ifaces = "eth0,eth1".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        assert!(stmt.label_selector.iface);

        let mut args = base_args();
        args.ifaces = "/eth[0-9]+/".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        assert!(stmt.label_selector.iface);
        assert!(stmt.ifaces.matches("eth3"));
        assert!(!stmt.ifaces.matches("wlan0"));
    }

    #[test]
    fn test_iface_list_deduplicates() {
        let mut args = base_args();
        args.ifaces = "eth0,eth1,eth0".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        match stmt.ifaces {
            IfaceSelection::List(names) => assert_eq!(names, vec!["eth0", "eth1"]),
            other => panic!("unexpected selection {:?}", other),
        }
    }

    #[test]
    fn test_single_iface_does_not_force_label() {
        let stmt = base_args().prepare_at(NOW).unwrap();
        assert!(!stmt.label_selector.iface);
    }

    #[test]
    fn test_empty_last_is_now_and_default_first() {
        let mut args = base_args();
        args.first = String::new();
        args.last = String::new();
        let stmt = args.prepare_at(NOW).unwrap();
        assert_eq!(stmt.last, NOW);
        assert_eq!(stmt.first, NOW - 30 * 86400);
    }

    #[test]
    fn test_first_after_last_rejected() {
        let mut args = base_args();
        args.first = "1456473000".to_string();
        args.last = "1456428000".to_string();
        let err = args.prepare_at(NOW).unwrap_err();
        assert!(err.details.iter().any(|d| d.field == "first"));
    }

    #[test]
    fn test_live_requires_unbounded_last() {
        let mut args = base_args();
        args.live = true;
        let err = args.prepare_at(NOW).unwrap_err();
        assert!(err.details.iter().any(|d| d.field == "live"));

        args.last = "max".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        assert!(stmt.live);
        assert_eq!(stmt.last, MAX_TIME);
    }

    #[test]
    fn test_direction_resolution() {
        let mut args = base_args();
        args.sum = true;
        assert_eq!(args.prepare_at(NOW).unwrap().direction, Direction::Sum);

        let mut args = base_args();
        args.in_ = true;
        assert_eq!(args.prepare_at(NOW).unwrap().direction, Direction::In);

        let mut args = base_args();
        args.out = true;
        assert_eq!(args.prepare_at(NOW).unwrap().direction, Direction::Out);

        let mut args = base_args();
        args.in_ = true;
        args.out = true;
        assert_eq!(args.prepare_at(NOW).unwrap().direction, Direction::Both);

        // External callers setting both directions are coerced to sum.
        args.caller = "external".to_string();
        assert_eq!(args.prepare_at(NOW).unwrap().direction, Direction::Sum);
    }

    #[test]
    fn test_dns_validation() {
        let mut args = base_args();
        args.dns_resolution.enabled = true;
        args.dns_resolution.timeout = 0;
        args.dns_resolution.max_rows = 0;
        let err = args.prepare_at(NOW).unwrap_err();
        assert_eq!(err.details.len(), 2);

        let mut args = base_args();
        args.dns_resolution.enabled = true;
        let stmt = args.prepare_at(NOW).unwrap();
        let dns = stmt.dns.unwrap();
        assert_eq!(dns.timeout, Duration::from_secs(2));
        assert_eq!(dns.max_rows, 25);
    }

    #[test]
    fn test_condition_echo_is_canonical() {
        let mut args = base_args();
        args.condition = "dport=443&proto=tcp".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        assert_eq!(stmt.condition_echo, "(dport = 443 & proto = 6)");
    }

    #[test]
    fn test_time_resolution_validation() {
        let mut args = base_args();
        args.query = "time,sip".to_string();
        args.time_resolution = "7m".to_string();
        let err = args.prepare_at(NOW).unwrap_err();
        assert!(err.details.iter().any(|d| d.field == "time_resolution"));

        args.time_resolution = "15m".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        assert_eq!(stmt.bucket, Some(900));

        args.time_resolution = "auto".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        assert_eq!(stmt.bucket, Some(300));
    }

    #[test]
    fn test_statement_attribute_names() {
        let mut args = base_args();
        args.query = "time,iface,sip,dip".to_string();
        let stmt = args.prepare_at(NOW).unwrap();
        assert_eq!(stmt.attribute_names(), vec!["time", "iface", "sip", "dip"]);
    }

    #[test]
    fn test_plan_roundtrip_through_json() {
        // Serialising the args and parsing them back yields an equivalent plan.
        let mut args = base_args();
        args.condition = "dport = 443".to_string();
        args.sort_by = "packets".to_string();
        args.sort_ascending = true;
        let json = serde_json::to_string(&args).unwrap();
        let back: Args = serde_json::from_str(&json).unwrap();
        let a = args.prepare_at(NOW).unwrap();
        let b = back.prepare_at(NOW).unwrap();
        assert_eq!(a.first, b.first);
        assert_eq!(a.last, b.last);
        assert_eq!(a.sort_by, b.sort_by);
        assert_eq!(a.ascending, b.ascending);
        assert_eq!(a.condition_echo, b.condition_echo);
        assert_eq!(a.attributes, b.attributes);
    }
}
