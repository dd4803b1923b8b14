//! Flow-level data types: keys, counters, attributes, protocols, and the
//! query condition tree.

pub mod attributes;
pub mod condition;
pub mod counters;
pub mod key;
pub mod protocols;

pub use attributes::{Attribute, AttributeParseError, LabelSelector, group_key, parse_query_type};
pub use condition::{CompOp, ConditionError, Node, Predicate};
pub use counters::Counters;
pub use key::{KEY_WIDTH_V4, KEY_WIDTH_V6, Key, TIMESTAMP_WIDTH};
pub use protocols::{proto_display, proto_name, proto_number};
