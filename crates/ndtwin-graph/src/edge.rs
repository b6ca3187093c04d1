//! Edge attributes: link state/capacity and the per-edge flow-set index.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ndtwin_common::{FlowKey, Timestamp, MININET_INTERFACE_SPEED_BPS};
use serde::{Deserialize, Serialize};

/// Stable opaque handle into the edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeHandle(pub(crate) usize);

impl EdgeHandle {
    /// Position of this edge in a `GraphSnapshot`'s `edges` vector.
    pub const fn index(&self) -> usize {
        self.0
    }
}

/// A directed link. Every physical link is modelled as two `Edge`s with
/// swapped endpoints; `GraphStore` keeps the pair consistent under a
/// single exclusive write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub src: super::vertex::VertexHandle,
    pub dst: super::vertex::VertexHandle,

    pub is_up: bool,
    pub is_enabled: bool,

    pub left_bandwidth: u64,
    pub link_bandwidth: u64,
    pub link_bandwidth_usage: u64,
    pub link_bandwidth_utilization: f64,
    pub left_bandwidth_from_flow_sample: u64,

    pub src_ip: Vec<Ipv4Addr>,
    pub src_dpid: u64,
    pub src_interface: u32,

    pub dst_ip: Vec<Ipv4Addr>,
    pub dst_dpid: u64,
    pub dst_interface: u32,

    /// FlowKey to last-seen timestamp. A temporal index swept on a 2s TTL
    /// by the topology monitor, not kept transactionally consistent with
    /// the collector's per-flow table. Serialised as the bare key set;
    /// timestamps are rebased to now on deserialisation, since a
    /// last-seen instant from another process means nothing here.
    #[serde(with = "flow_set_keys")]
    pub flow_set: HashMap<FlowKey, Timestamp>,
}

mod flow_set_keys {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        set: &HashMap<FlowKey, Timestamp>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let keys: Vec<&FlowKey> = set.keys().collect();
        keys.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<FlowKey, Timestamp>, D::Error> {
        let keys = Vec::<FlowKey>::deserialize(deserializer)?;
        Ok(keys.into_iter().map(|k| (k, Timestamp::now())).collect())
    }
}

impl Edge {
    pub fn new(src: super::vertex::VertexHandle, dst: super::vertex::VertexHandle) -> Self {
        Self {
            src,
            dst,
            is_up: false,
            is_enabled: false,
            left_bandwidth: 0,
            link_bandwidth: MININET_INTERFACE_SPEED_BPS,
            link_bandwidth_usage: 0,
            link_bandwidth_utilization: 0.0,
            left_bandwidth_from_flow_sample: MININET_INTERFACE_SPEED_BPS,
            src_ip: Vec::new(),
            src_dpid: 0,
            src_interface: 0,
            dst_ip: Vec::new(),
            dst_dpid: 0,
            dst_interface: 0,
            flow_set: HashMap::new(),
        }
    }

    /// Inserts or refreshes `key → now`, returning whether it was new.
    pub fn touch_flow(&mut self, key: FlowKey) -> bool {
        self.flow_set.insert(key, Timestamp::now()).is_none()
    }

    /// Removes entries whose last-seen timestamp is older than `ttl_ms`.
    pub fn sweep_expired(&mut self, ttl_ms: u64) {
        self.flow_set.retain(|_, ts| ts.elapsed_ms() <= ttl_ms);
    }
}
