//! Query attribute parsing and grouping-key derivation.
//!
//! The `query` argument is a comma-separated attribute list. Packet
//! attributes (sip, dip, dport, proto) select which key fields take part in
//! the grouping; label attributes (time, iface, hostname, host_id) select
//! partition labels that must appear in the output rows.

use crate::types::key::{KEY_WIDTH_V4, KEY_WIDTH_V6, Key};

/// A packet attribute participating in the grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Sip,
    Dip,
    Dport,
    Proto,
}

impl Attribute {
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::Sip => "sip",
            Attribute::Dip => "dip",
            Attribute::Dport => "dport",
            Attribute::Proto => "proto",
        }
    }
}

/// Selects the partition labels that appear in output rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelSelector {
    pub timestamp: bool,
    pub iface: bool,
    pub hostname: bool,
    pub host_id: bool,
}

impl LabelSelector {
    pub fn any(&self) -> bool {
        self.timestamp || self.iface || self.hostname || self.host_id
    }
}

/// Error type for attribute list parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeParseError {
    /// Zero-based position of the offending token in the list.
    pub position: usize,
    pub token: String,
}

impl std::fmt::Display for AttributeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown attribute '{}' at position {}",
            self.token, self.position
        )
    }
}

impl std::error::Error for AttributeParseError {}

/// Parses a comma-separated attribute list into the ordered packet
/// attributes and the label selector. Duplicates collapse to the first
/// occurrence.
pub fn parse_query_type(
    query: &str,
) -> Result<(Vec<Attribute>, LabelSelector), AttributeParseError> {
    let mut attributes = Vec::new();
    let mut selector = LabelSelector::default();

    for (position, raw) in query.split(',').enumerate() {
        let token = raw.trim();
        let attr = match token {
            "sip" | "src" => Some(Attribute::Sip),
            "dip" | "dst" => Some(Attribute::Dip),
            "dport" => Some(Attribute::Dport),
            "proto" => Some(Attribute::Proto),
            "time" => {
                selector.timestamp = true;
                None
            }
            "iface" => {
                selector.iface = true;
                None
            }
            "hostname" => {
                selector.hostname = true;
                None
            }
            "hostid" | "host_id" => {
                selector.host_id = true;
                None
            }
            _ => {
                return Err(AttributeParseError {
                    position,
                    token: token.to_string(),
                });
            }
        };
        if let Some(attr) = attr
            && !attributes.contains(&attr)
        {
            attributes.push(attr);
        }
    }

    Ok((attributes, selector))
}

/// Derives the grouping key for one block entry.
///
/// The grouping key keeps the flow-key layout with the bytes of unselected
/// attributes zeroed, so flows that differ only in unselected fields merge.
/// When no IP attribute is selected the key is normalised to the IPv4
/// width, merging IPv4 and IPv6 traffic with equal dport/proto.
pub fn group_key(key: &Key, attributes: &[Attribute], timestamp: Option<i64>) -> Key {
    let wants_ip = attributes
        .iter()
        .any(|a| matches!(a, Attribute::Sip | Attribute::Dip));
    let width = if wants_ip && key.is_v6() {
        KEY_WIDTH_V6
    } else {
        KEY_WIDTH_V4
    };

    let mut bytes = vec![0u8; width];
    let ip_width = if width == KEY_WIDTH_V6 { 16 } else { 4 };
    for attr in attributes {
        match attr {
            Attribute::Sip => bytes[0..ip_width].copy_from_slice(key.sip_bytes()),
            Attribute::Dip => {
                bytes[ip_width..2 * ip_width].copy_from_slice(key.dip_bytes());
            }
            Attribute::Dport => {
                bytes[2 * ip_width..2 * ip_width + 2].copy_from_slice(&key.dport().to_be_bytes());
            }
            Attribute::Proto => bytes[2 * ip_width + 2] = key.proto(),
        }
    }

    let grouped = Key::from_bytes(bytes);
    match timestamp {
        Some(ts) => grouped.extend(ts),
        None => grouped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_packet_attributes() {
        let (attrs, sel) = parse_query_type("sip,dip").unwrap();
        assert_eq!(attrs, vec![Attribute::Sip, Attribute::Dip]);
        assert!(!sel.any());
    }

    #[test]
    fn test_parse_aliases_and_labels() {
        let (attrs, sel) = parse_query_type("time,src,dst,iface").unwrap();
        assert_eq!(attrs, vec![Attribute::Sip, Attribute::Dip]);
        assert!(sel.timestamp);
        assert!(sel.iface);
        assert!(!sel.hostname);
    }

    #[test]
    fn test_parse_duplicates_collapse() {
        let (attrs, _) = parse_query_type("sip,sip,dport").unwrap();
        assert_eq!(attrs, vec![Attribute::Sip, Attribute::Dport]);
    }

    #[test]
    fn test_parse_error_reports_position() {
        let err = parse_query_type("sip,bogus,dip").unwrap_err();
        assert_eq!(err.position, 1);
        assert_eq!(err.token, "bogus");
    }

    #[test]
    fn test_group_key_zeroes_unselected() {
        let k = Key::v4(
            "172.4.12.2".parse().unwrap(),
            "10.11.12.13".parse().unwrap(),
            443,
            6,
        );
        let g = group_key(&k, &[Attribute::Sip], None);
        assert_eq!(g.sip().to_string(), "172.4.12.2");
        assert_eq!(g.dip().to_string(), "0.0.0.0");
        assert_eq!(g.dport(), 0);
        assert_eq!(g.proto(), 0);
    }

    #[test]
    fn test_group_key_merges_versions_without_ip_attrs() {
        let v4 = Key::v4("1.2.3.4".parse().unwrap(), "5.6.7.8".parse().unwrap(), 53, 17);
        let v6 = Key::v6(
            "2001:db8::1".parse().unwrap(),
            "2001:db8::2".parse().unwrap(),
            53,
            17,
        );
        let g4 = group_key(&v4, &[Attribute::Dport, Attribute::Proto], None);
        let g6 = group_key(&v6, &[Attribute::Dport, Attribute::Proto], None);
        assert_eq!(g4, g6);
        assert_eq!(g4.as_bytes().len(), KEY_WIDTH_V4);
    }

    #[test]
    fn test_group_key_keeps_width_with_ip_attr() {
        let v6 = Key::v6(
            "2001:db8::1".parse().unwrap(),
            "2001:db8::2".parse().unwrap(),
            53,
            17,
        );
        let g = group_key(&v6, &[Attribute::Sip], None);
        assert_eq!(g.as_bytes().len(), KEY_WIDTH_V6);
        assert_eq!(g.sip().to_string(), "2001:db8::1");
    }

    #[test]
    fn test_group_key_with_timestamp() {
        let k = Key::v4("1.2.3.4".parse().unwrap(), "5.6.7.8".parse().unwrap(), 80, 6);
        let g = group_key(&k, &[Attribute::Sip], Some(1456428000));
        assert_eq!(g.timestamp(), Some(1456428000));
    }
}
