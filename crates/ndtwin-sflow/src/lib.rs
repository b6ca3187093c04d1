//! sFlow v5 collector: UDP ingest, per-flow/per-agent accounting, path
//! attribution against the classifier and graph store, and the
//! periodic/immediate rate and idle-purge sweeps.

pub mod collector;
pub mod flowpath;
pub mod flowstats;
pub mod ingest;
pub mod pathmap;
pub mod wire;

pub use collector::{Collector, CollectorConfig};
pub use flowstats::{AutoRefreshQueue, CounterInfo, FlowInfo, FlowStats};
pub use pathmap::{Hop, Path, PathMap};
