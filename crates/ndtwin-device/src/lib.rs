//! Device status poller: periodic power/CPU/memory/temperature and
//! flow-table snapshots into lock-protected caches, a reachability
//! pinger that keeps the graph's up/down state honest, and power-state
//! control dispatched through a pluggable `DeviceAdapter`.

pub mod adapter;
pub mod flowtable;
pub mod poller;

pub use adapter::{DeviceAdapter, DeviceStatus, SimulatedAdapter};
pub use flowtable::{
    get_flow_table_diff, parse_batch, parse_table, FlowChange, FlowDiff, FlowEntry,
    FlowTableBatch, FlowTableCache,
};
pub use poller::{
    run_flow_table_task, run_reachability_task, run_status_task, DevicePoller, PollerConfig,
};
