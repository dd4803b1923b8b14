//! Query arguments, validation, and the immutable statement plan.

pub mod args;
pub mod errors;
pub mod statement;

pub use args::{Args, DnsResolutionArgs};
pub use errors::{ArgsError, CODE_UNPROCESSABLE, DetailError, QueryError};
pub use statement::{
    Direction, DnsConfig, Format, IfaceSelection, SortOrder, Statement, UNLIMITED_RESULTS,
};
