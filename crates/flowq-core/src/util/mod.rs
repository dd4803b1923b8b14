//! Helper utilities.

pub mod time;

pub use time::{
    DEFAULT_BUCKET_SECS, MAX_TIME, TimeParseError, auto_bucket, bin_timestamp, parse_duration_secs,
    parse_timestamp, parse_timestamp_at,
};
