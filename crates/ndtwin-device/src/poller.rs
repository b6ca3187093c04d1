//! The device status poller: two independent 10s poll tasks draining
//! into lock-protected caches, a 1 Hz reachability pinger, and the
//! power-state mutation path.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use ndtwin_common::{NdtError, NdtResult};
use ndtwin_events::EventBus;
use ndtwin_graph::{GraphStore, VertexKind};
use ndtwin_topology::transitions;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::adapter::{DeviceAdapter, DeviceStatus};
use crate::flowtable::{parse_table, FlowTableCache};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub status_interval: Duration,
    pub flow_table_interval: Duration,
    pub ping_interval: Duration,
    pub ping_retries: u32,
    pub ping_spacing: Duration,
    pub ping_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(10),
            flow_table_interval: Duration::from_secs(10),
            ping_interval: Duration::from_secs(1),
            ping_retries: 3,
            ping_spacing: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

/// One switch worth polling, snapshotted out of the graph so the poll
/// tasks never hold the graph lock across adapter I/O.
#[derive(Debug, Clone)]
struct SwitchTarget {
    dpid: u64,
    agent_ip: Ipv4Addr,
    brand: String,
    bridge_name: Option<String>,
}

pub struct DevicePoller {
    graph: Arc<GraphStore>,
    events: Arc<EventBus>,
    adapter: Arc<dyn DeviceAdapter>,
    config: PollerConfig,
    status_cache: RwLock<HashMap<u64, DeviceStatus>>,
    flow_tables: Arc<FlowTableCache>,
}

impl DevicePoller {
    pub fn new(
        graph: Arc<GraphStore>,
        events: Arc<EventBus>,
        adapter: Arc<dyn DeviceAdapter>,
        flow_tables: Arc<FlowTableCache>,
        config: PollerConfig,
    ) -> Self {
        Self {
            graph,
            events,
            adapter,
            config,
            status_cache: RwLock::new(HashMap::new()),
            flow_tables,
        }
    }

    pub fn flow_tables(&self) -> &Arc<FlowTableCache> {
        &self.flow_tables
    }

    /// Snapshot read of every cached device status.
    pub fn status_snapshot(&self) -> HashMap<u64, DeviceStatus> {
        self.status_cache.read().clone()
    }

    fn switch_targets(&self, only_up: bool) -> Vec<SwitchTarget> {
        self.graph
            .get_graph()
            .vertices
            .into_iter()
            .filter(|v| v.kind == VertexKind::Switch)
            .filter(|v| !only_up || v.is_up)
            .filter_map(|v| {
                let agent_ip = v.ip.first().copied()?;
                Some(SwitchTarget {
                    dpid: v.dpid,
                    agent_ip,
                    brand: v.brand_name,
                    bridge_name: v.bridge_name,
                })
            })
            .collect()
    }

    /// One status-poll pass: power/CPU/memory/temperature for every
    /// switch that is up. A failed fetch keeps the previous cached value
    /// and is retried on the next tick.
    pub async fn run_status_tick(&self) {
        for target in self.switch_targets(true) {
            match self.adapter.status_of(target.agent_ip, &target.brand).await {
                Ok(status) => {
                    self.status_cache.write().insert(target.dpid, status);
                }
                Err(e) => {
                    error!(dpid = target.dpid, error = %e, "device status fetch failed; keeping previous");
                }
            }
        }
    }

    /// One flow-table-poll pass: fetch each up switch's flow table and
    /// replace its cached entries.
    pub async fn run_flow_table_tick(&self) {
        for target in self.switch_targets(true) {
            match self.adapter.flow_table_of(target.dpid).await {
                Ok(doc) => {
                    self.flow_tables.set_table(target.dpid, parse_table(&doc));
                }
                Err(e) => {
                    error!(dpid = target.dpid, error = %e, "flow table fetch failed; keeping previous");
                }
            }
        }
    }

    /// One reachability pass over every switch. A switch is considered
    /// reachable if any of `ping_retries` probes succeeds; each probe is
    /// bounded by `ping_timeout`, with `ping_spacing` between retries.
    /// Unreachable switches are marked down and disabled; switches that
    /// come back are marked up.
    pub async fn run_reachability_tick(&self) {
        for target in self.switch_targets(false) {
            let reachable = self.probe(&target).await;
            let Some(v) = self.graph.find_vertex_by_dpid(target.dpid) else {
                continue;
            };
            if reachable {
                transitions::set_vertex_up(&self.graph, &self.events, v, target.agent_ip);
            } else {
                let was_up = self.graph.with_vertex(v, |vertex| vertex.is_up);
                if was_up {
                    warn!(dpid = target.dpid, "switch unreachable; disabling it and its links");
                }
                transitions::set_vertex_down(&self.graph, &self.events, v, target.agent_ip);
                transitions::disable_switch_and_edges(&self.graph, &self.events, target.dpid);
            }
        }
    }

    async fn probe(&self, target: &SwitchTarget) -> bool {
        for attempt in 0..self.config.ping_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.ping_spacing).await;
            }
            let probe = self
                .adapter
                .is_reachable(target.agent_ip, target.bridge_name.as_deref());
            match tokio::time::timeout(self.config.ping_timeout, probe).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => debug!(dpid = target.dpid, attempt, "reachability probe timed out"),
            }
        }
        false
    }

    /// Powers a switch on or off: through the smart-plug relay when the
    /// topology carries one (testbed), through bridge management
    /// otherwise (simulated). The vertex up/down flag follows the
    /// outcome.
    pub async fn set_power_state(&self, dpid: u64, on: bool) -> NdtResult<()> {
        let Some(v) = self.graph.find_vertex_by_dpid(dpid) else {
            return Err(NdtError::NotFound(format!("no switch with dpid {dpid}")));
        };
        let (agent_ip, plug, bridge) = self.graph.with_vertex(v, |vertex| {
            (
                vertex.ip.first().copied(),
                vertex.smart_plug_ip.map(|ip| (ip, vertex.smart_plug_outlet)),
                vertex.bridge_name.clone(),
            )
        });

        match (plug, bridge) {
            (Some((plug_ip, outlet)), _) => {
                self.adapter.set_smart_plug(plug_ip, outlet, on).await?;
            }
            (None, Some(bridge_name)) => {
                self.adapter.set_bridge(&bridge_name, on).await?;
            }
            (None, None) => {
                return Err(NdtError::NotFound(format!(
                    "switch {dpid} has neither a smart plug nor a bridge"
                )));
            }
        }

        let agent_ip = agent_ip.unwrap_or(Ipv4Addr::UNSPECIFIED);
        if on {
            transitions::set_vertex_up(&self.graph, &self.events, v, agent_ip);
        } else {
            transitions::set_vertex_down(&self.graph, &self.events, v, agent_ip);
        }
        Ok(())
    }
}

/// 10s device-status poll task. The poll intervals here are long, so
/// shutdown must interrupt the wait rather than ride out the tick.
pub async fn run_status_task(poller: Arc<DevicePoller>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(poller.config.status_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => poller.run_status_tick().await,
            _ = stop.changed() => return,
        }
    }
}

/// 10s flow-table poll task.
pub async fn run_flow_table_task(poller: Arc<DevicePoller>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(poller.config.flow_table_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => poller.run_flow_table_tick().await,
            _ = stop.changed() => return,
        }
    }
}

/// 1 Hz reachability pinger task.
pub async fn run_reachability_task(poller: Arc<DevicePoller>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(poller.config.ping_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => poller.run_reachability_tick().await,
            _ = stop.changed() => return,
        }
    }
}
