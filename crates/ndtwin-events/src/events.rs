//! Event payloads for the six topics the core emits, as a single tagged
//! sum type so dispatch is an exhaustive match instead of a runtime
//! downcast over type-erased payloads.

use std::net::Ipv4Addr;

use ndtwin_common::FlowKey;

/// One event the core can emit, carrying its own payload.
#[derive(Debug, Clone)]
pub enum NdtEvent {
    /// A new flow was observed and given a `FlowInfo` entry.
    FlowAdded(FlowAddedPayload),
    /// A link failure was detected during topology refresh.
    LinkFailureDetected(LinkFailurePayload),
    /// An idle flow was removed by the purge sweep.
    IdleFlowPurged(IdleFlowPurgedPayload),
    /// A previously failed link came back up.
    LinkRecoveryDetected(LinkRecoveryPayload),
    /// A switch became reachable (vertex transitioned to up).
    SwitchEntered(SwitchTransitionPayload),
    /// A switch became unreachable (vertex transitioned to down).
    SwitchExited(SwitchTransitionPayload),
}

impl NdtEvent {
    /// Stable topic name, used for logging and test assertions.
    pub fn topic(&self) -> &'static str {
        match self {
            NdtEvent::FlowAdded(_) => "FlowAdded",
            NdtEvent::LinkFailureDetected(_) => "LinkFailureDetected",
            NdtEvent::IdleFlowPurged(_) => "IdleFlowPurged",
            NdtEvent::LinkRecoveryDetected(_) => "LinkRecoveryDetected",
            NdtEvent::SwitchEntered(_) => "SwitchEntered",
            NdtEvent::SwitchExited(_) => "SwitchExited",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlowAddedPayload {
    pub key: FlowKey,
    pub start_time_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkFailurePayload {
    pub src_dpid: u64,
    pub dst_dpid: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct IdleFlowPurgedPayload {
    pub key: FlowKey,
    pub end_time_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkRecoveryPayload {
    pub src_dpid: u64,
    pub dst_dpid: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SwitchTransitionPayload {
    pub dpid: u64,
    pub agent_ip: Ipv4Addr,
}
