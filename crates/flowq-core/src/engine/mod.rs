//! Query execution: work managers, aggregation, memory guard, runner.

pub mod aggregate;
pub mod memory;
pub mod run;
pub mod work_manager;

pub use aggregate::{AggregateResult, aggregate};
pub use memory::{HeapWatcher, MemoryProbe, SystemProbe, check_limit, release_memory_to_os};
pub use run::LocalRunner;
pub use work_manager::{
    CHANNEL_DEPTH, FlowMap, HostInfo, PartialMap, QueryStats, WorkManager, new_flow_map,
};
