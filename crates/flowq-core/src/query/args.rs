//! Wire-level query arguments.
//!
//! The JSON field names are part of the wire contract shared by the CLI,
//! stored-query files, and the query server. All fields default so a
//! stored-query file can name only the fields it overrides.

use serde::{Deserialize, Serialize};

/// Reverse-DNS resolution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsResolutionArgs {
    pub enabled: bool,
    /// Overall lookup deadline in seconds.
    pub timeout: u64,
    /// Number of top rows whose IPs are resolved.
    pub max_rows: usize,
}

impl Default for DnsResolutionArgs {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: 2,
            max_rows: 25,
        }
    }
}

/// A complete query request. `prepare()` turns this into an immutable
/// [`Statement`](crate::query::Statement) or a composite validation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Args {
    /// Comma-separated attribute list, e.g. `"time,sip,dip"`.
    pub query: String,
    /// Comma-separated interface list, `any`, or `/regex/`.
    pub ifaces: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_hosts: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub host_id: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub condition: String,
    #[serde(rename = "in")]
    pub in_: bool,
    pub out: bool,
    pub sum: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub first: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub last: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub time_resolution: String,
    pub format: String,
    pub sort_by: String,
    pub num_results: u64,
    pub sort_ascending: bool,
    pub list: bool,
    pub version: bool,
    pub dns_resolution: DnsResolutionArgs,
    pub max_mem_pct: u32,
    pub low_mem: bool,
    /// Streaming keep-alive interval in seconds; 0 disables keep-alives.
    pub keepalive: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub caller: String,
    pub live: bool,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

impl Default for Args {
    fn default() -> Self {
        Self {
            query: String::new(),
            ifaces: String::new(),
            query_hosts: None,
            hostname: String::new(),
            host_id: 0,
            condition: String::new(),
            in_: false,
            out: false,
            sum: false,
            first: String::new(),
            last: String::new(),
            time_resolution: String::new(),
            format: "txt".to_string(),
            sort_by: "bytes".to_string(),
            num_results: 1000,
            sort_ascending: false,
            list: false,
            version: false,
            dns_resolution: DnsResolutionArgs::default(),
            max_mem_pct: 60,
            low_mem: false,
            keepalive: 0,
            caller: String::new(),
            live: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let args = Args {
            query: "sip,dip".to_string(),
            ifaces: "eth0".to_string(),
            condition: "dport = 443".to_string(),
            first: "1456428000".to_string(),
            last: "1456473000".to_string(),
            format: "json".to_string(),
            ..Args::default()
        };
        let json = serde_json::to_string(&args).unwrap();
        let back: Args = serde_json::from_str(&json).unwrap();
        assert_eq!(back, args);
    }

    #[test]
    fn test_wire_field_names() {
        let args = Args {
            query: "sip".to_string(),
            in_: true,
            ..Args::default()
        };
        let json = serde_json::to_string(&args).unwrap();
        assert!(json.contains("\"in\":true"));
        assert!(json.contains("\"sort_by\""));
        assert!(json.contains("\"num_results\""));
        assert!(json.contains("\"dns_resolution\""));
        assert!(json.contains("\"max_rows\""));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let args: Args = serde_json::from_str(r#"{"query":"sip","ifaces":"eth0"}"#).unwrap();
        assert_eq!(args.format, "txt");
        assert_eq!(args.num_results, 1000);
        assert_eq!(args.max_mem_pct, 60);
        assert!(!args.dns_resolution.enabled);
    }
}
