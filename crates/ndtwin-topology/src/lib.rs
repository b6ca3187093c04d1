//! Topology monitor: loads the static topology into a `GraphStore`,
//! derives forwarding rules via BFS from each destination, narrates
//! link/switch state transitions onto the event bus, and sweeps expired
//! edge flow-set entries.

pub mod bfs;
pub mod loader;
pub mod sweeper;
pub mod transitions;

pub use bfs::{
    compute_all_paths_rules, compute_all_paths_to_dst, compute_forwarding_rules, ForwardingRule,
    PathNode,
};
pub use loader::{load, load_into_memory};
pub use sweeper::run_ttl_sweeper_task;
pub use transitions::{disable_switch_and_edges, enable_switch_and_edges, set_vertex_down, set_vertex_up};
