//! 1 Hz TTL sweeper: expires stale entries out of every edge's flow set.

use std::sync::Arc;
use std::time::Duration;

use ndtwin_common::EDGE_FLOW_TTL_MS;
use ndtwin_graph::GraphStore;
use tokio::sync::watch;

/// Runs the sweep once per second until `stop` fires.
pub async fn run_ttl_sweeper_task(graph: Arc<GraphStore>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    while !*stop.borrow() {
        interval.tick().await;
        graph.sweep_flow_ttl(EDGE_FLOW_TTL_MS);
        if stop.has_changed().unwrap_or(false) {
            let _ = stop.changed().await;
        }
    }
}
