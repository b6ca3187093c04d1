//! Flow identity types shared by the collector, classifier and dispatcher.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Canonical 5-tuple identifying a flow for telemetry purposes.
///
/// `icmp_type`/`icmp_code` are carried for protocol 1 but are deliberately
/// excluded from equality and hashing: two keys differing only in ICMP
/// type/code must still compare and hash equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub icmp_type: u8,
    pub icmp_code: u8,
}

impl FlowKey {
    #[inline]
    pub const fn new(
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
            icmp_type: 0,
            icmp_code: 0,
        }
    }

    #[inline]
    pub const fn with_icmp(mut self, icmp_type: u8, icmp_code: u8) -> Self {
        self.icmp_type = icmp_type;
        self.icmp_code = icmp_code;
        self
    }

    /// Fast FxHash-style mix over the five identity fields. Used both for
    /// `HashMap` storage and for the BFS neighbour tie-break
    /// (`hash(dstIP || dpid)`).
    #[inline]
    pub fn fx_hash(&self) -> u64 {
        const K: u64 = 0x517cc1b727220a95;
        let mut h: u64 = 0;
        h = h.wrapping_add(u32::from(self.src_ip).wrapping_mul(K as u32) as u64);
        h = h.rotate_left(31);
        h = h.wrapping_add(u32::from(self.dst_ip).wrapping_mul(K as u32) as u64);
        h = h.rotate_left(31);
        h = h.wrapping_add(
            ((self.src_port as u64) << 16 | self.dst_port as u64).wrapping_mul(K),
        );
        h = h.rotate_left(31);
        h = h.wrapping_add((self.protocol as u64).wrapping_mul(K));
        h
    }
}

impl PartialEq for FlowKey {
    fn eq(&self, other: &Self) -> bool {
        self.src_ip == other.src_ip
            && self.dst_ip == other.dst_ip
            && self.src_port == other.src_port
            && self.dst_port == other.dst_port
            && self.protocol == other.protocol
    }
}

impl Eq for FlowKey {}

impl std::hash::Hash for FlowKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.src_ip.hash(state);
        self.dst_ip.hash(state);
        self.src_port.hash(state);
        self.dst_port.hash(state);
        self.protocol.hash(state);
    }
}

/// Identifies one observation point (switch-port) reporting sFlow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentKey {
    pub agent_ip: Ipv4Addr,
    pub interface_port: u32,
}

impl AgentKey {
    pub const fn new(agent_ip: Ipv4Addr, interface_port: u32) -> Self {
        Self {
            agent_ip,
            interface_port,
        }
    }
}
