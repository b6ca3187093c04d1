//! `DeviceAdapter`: the seam between the poller and whatever actually
//! answers "is this switch alive and how loaded is it": a simulated,
//! deterministic stand-in during development, or real SNMP/SSH/smart-plug
//! transports against a physical testbed.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use ndtwin_common::NdtResult;
use parking_lot::RwLock;

/// A snapshot of one switch's operating condition.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceStatus {
    pub power_watts: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub temperature_celsius: f64,
}

/// Adapter over a device's out-of-band management surface. `brand`
/// selects the transport on testbed implementations (SNMP for HPE,
/// SSH-parsed text for the rest); the simulated implementation ignores
/// it. The poller only depends on this trait, never on a transport.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    async fn power_of(&self, agent_ip: Ipv4Addr, brand: &str) -> NdtResult<f64>;
    async fn cpu_of(&self, agent_ip: Ipv4Addr, brand: &str) -> NdtResult<f64>;
    async fn memory_of(&self, agent_ip: Ipv4Addr, brand: &str) -> NdtResult<f64>;
    async fn temperature_of(&self, agent_ip: Ipv4Addr, brand: &str) -> NdtResult<f64>;

    /// The switch's current flow table, as the poll-document JSON the
    /// classifier understands.
    async fn flow_table_of(&self, dpid: u64) -> NdtResult<serde_json::Value>;

    /// Switches one outlet of a smart-plug relay (testbed power control).
    async fn set_smart_plug(&self, plug_ip: Ipv4Addr, outlet: u32, on: bool) -> NdtResult<()>;

    /// Creates or tears down a software bridge (simulated power control).
    async fn set_bridge(&self, bridge_name: &str, on: bool) -> NdtResult<()>;

    /// One reachability probe. Testbed implementations ping the
    /// management IP; simulated ones check the bridge list instead, which
    /// is why the bridge name rides along.
    async fn is_reachable(&self, agent_ip: Ipv4Addr, bridge_name: Option<&str>) -> bool;

    async fn status_of(&self, agent_ip: Ipv4Addr, brand: &str) -> NdtResult<DeviceStatus> {
        Ok(DeviceStatus {
            power_watts: self.power_of(agent_ip, brand).await?,
            cpu_percent: self.cpu_of(agent_ip, brand).await?,
            memory_percent: self.memory_of(agent_ip, brand).await?,
            temperature_celsius: self.temperature_of(agent_ip, brand).await?,
        })
    }
}

/// Deterministic pseudo-random adapter: every metric is a hash of the
/// agent's IP string, so repeated polls of the same switch return the
/// same numbers and different switches differ, without any real
/// out-of-band link. Reachability is the presence of the switch's bridge
/// in the local bridge list, mirroring how the simulated deployment
/// checks liveness.
#[derive(Default)]
pub struct SimulatedAdapter {
    bridges: RwLock<HashSet<String>>,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bridges(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            bridges: RwLock::new(names.into_iter().collect()),
        }
    }

    fn seed(agent_ip: Ipv4Addr) -> u64 {
        let s = agent_ip.to_string();
        let mut h: u64 = 0xcbf29ce484222325;
        for b in s.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        h
    }

    fn metric_in_range(agent_ip: Ipv4Addr, salt: u64, lo: f64, hi: f64) -> f64 {
        let h = Self::seed(agent_ip).wrapping_mul(salt).rotate_left(13);
        let unit = (h % 10_000) as f64 / 10_000.0;
        lo + unit * (hi - lo)
    }
}

#[async_trait]
impl DeviceAdapter for SimulatedAdapter {
    async fn power_of(&self, agent_ip: Ipv4Addr, _brand: &str) -> NdtResult<f64> {
        Ok(Self::metric_in_range(agent_ip, 1, 20.0, 150.0))
    }

    async fn cpu_of(&self, agent_ip: Ipv4Addr, _brand: &str) -> NdtResult<f64> {
        Ok(Self::metric_in_range(agent_ip, 2, 1.0, 95.0))
    }

    async fn memory_of(&self, agent_ip: Ipv4Addr, _brand: &str) -> NdtResult<f64> {
        Ok(Self::metric_in_range(agent_ip, 3, 5.0, 90.0))
    }

    async fn temperature_of(&self, agent_ip: Ipv4Addr, _brand: &str) -> NdtResult<f64> {
        Ok(Self::metric_in_range(agent_ip, 4, 30.0, 75.0))
    }

    async fn flow_table_of(&self, dpid: u64) -> NdtResult<serde_json::Value> {
        Ok(serde_json::json!({ "dpid": dpid, "flows": [] }))
    }

    async fn set_smart_plug(&self, _plug_ip: Ipv4Addr, _outlet: u32, _on: bool) -> NdtResult<()> {
        Ok(())
    }

    async fn set_bridge(&self, bridge_name: &str, on: bool) -> NdtResult<()> {
        let mut bridges = self.bridges.write();
        if on {
            bridges.insert(bridge_name.to_string());
        } else {
            bridges.remove(bridge_name);
        }
        Ok(())
    }

    async fn is_reachable(&self, _agent_ip: Ipv4Addr, bridge_name: Option<&str>) -> bool {
        match bridge_name {
            Some(name) => self.bridges.read().contains(name),
            // A switch with no bridge configured has nothing to check
            // against in simulation; treat it as reachable.
            None => true,
        }
    }
}
