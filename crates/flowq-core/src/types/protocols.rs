//! Static mapping between IP protocol numbers and names.
//!
//! Covers the IANA-assigned protocols that show up in flow captures; the
//! display helper falls back to the raw number for anything unlisted.

/// Assigned protocol numbers and their canonical names.
static PROTOCOLS: &[(u8, &str)] = &[
    (0, "HOPOPT"),
    (1, "ICMP"),
    (2, "IGMP"),
    (3, "GGP"),
    (4, "IPv4"),
    (5, "ST"),
    (6, "TCP"),
    (7, "CBT"),
    (8, "EGP"),
    (9, "IGP"),
    (12, "PUP"),
    (17, "UDP"),
    (20, "HMP"),
    (27, "RDP"),
    (33, "DCCP"),
    (40, "IL"),
    (41, "IPv6"),
    (43, "IPv6-Route"),
    (44, "IPv6-Frag"),
    (45, "IDRP"),
    (46, "RSVP"),
    (47, "GRE"),
    (50, "ESP"),
    (51, "AH"),
    (55, "MOBILE"),
    (58, "IPv6-ICMP"),
    (59, "IPv6-NoNxt"),
    (60, "IPv6-Opts"),
    (66, "RVD"),
    (88, "EIGRP"),
    (89, "OSPFIGP"),
    (93, "AX.25"),
    (94, "IPIP"),
    (97, "ETHERIP"),
    (98, "ENCAP"),
    (103, "PIM"),
    (108, "IPComp"),
    (112, "VRRP"),
    (115, "L2TP"),
    (124, "ISIS"),
    (132, "SCTP"),
    (133, "FC"),
    (135, "Mobility"),
    (136, "UDPLite"),
    (137, "MPLS-in-IP"),
    (138, "manet"),
    (139, "HIP"),
    (140, "Shim6"),
    (141, "WESP"),
    (142, "ROHC"),
];

/// Returns the canonical name for a protocol number, if assigned.
pub fn proto_name(num: u8) -> Option<&'static str> {
    PROTOCOLS.iter().find(|(n, _)| *n == num).map(|(_, s)| *s)
}

/// Returns the protocol number for a name (case-insensitive).
pub fn proto_number(name: &str) -> Option<u8> {
    PROTOCOLS
        .iter()
        .find(|(_, s)| s.eq_ignore_ascii_case(name))
        .map(|(n, _)| *n)
}

/// Name for display: the canonical name, or the number itself when the
/// protocol is unassigned.
pub fn proto_display(num: u8) -> String {
    match proto_name(num) {
        Some(s) => s.to_string(),
        None => num.to_string(),
    }
}
