//! Vertex attributes and the ECMP group shape of the static topology
//! file format.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Stable opaque handle into the vertex arena. Indices are never reused
/// within the lifetime of a `GraphStore`; vertices are created once at
/// startup and only their attributes mutate afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexHandle(pub(crate) usize);

impl VertexHandle {
    /// Position of this vertex in a `GraphSnapshot`'s `vertices` vector.
    /// Snapshots never reorder or remove vertices, so a handle obtained
    /// before the snapshot was taken still indexes correctly into it.
    pub const fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexKind {
    Switch,
    Host,
}

/// A single ECMP group member. Only physical ports are modelled today;
/// the enum wrapper leaves room for other member kinds without breaking
/// the file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EcmpMember {
    Port { port_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EcmpGroup {
    pub members: Vec<EcmpMember>,
}

/// Attributes attached to a vertex. `kind == Switch` vertices carry a
/// non-zero `dpid`; host vertices always report `dpid == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub kind: VertexKind,
    pub dpid: u64,
    pub mac: u64,
    pub ip: Vec<Ipv4Addr>,
    pub is_up: bool,
    pub is_enabled: bool,
    pub device_name: String,
    pub nick_name: String,
    pub brand_name: String,
    pub device_layer: i32,
    /// Present only in simulated mode.
    pub bridge_name: Option<String>,
    pub bridge_connected_ports: Vec<String>,
    pub ecmp_groups: Vec<EcmpGroup>,
    /// Testbed mode only: the smart plug feeding this switch.
    pub smart_plug_ip: Option<Ipv4Addr>,
    pub smart_plug_outlet: u32,
}

impl Vertex {
    pub fn new_switch(dpid: u64) -> Self {
        Self {
            kind: VertexKind::Switch,
            dpid,
            mac: 0,
            ip: Vec::new(),
            is_up: false,
            is_enabled: false,
            device_name: String::new(),
            nick_name: String::new(),
            brand_name: String::new(),
            device_layer: -1,
            bridge_name: None,
            bridge_connected_ports: Vec::new(),
            ecmp_groups: Vec::new(),
            smart_plug_ip: None,
            smart_plug_outlet: 0,
        }
    }

    pub fn new_host() -> Self {
        Self {
            kind: VertexKind::Host,
            dpid: 0,
            ..Self::new_switch(0)
        }
    }
}
