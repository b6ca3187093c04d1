//! Vertex up/down and enable/disable transitions, emitting
//! `SwitchEntered`/`SwitchExited`/`LinkFailureDetected`/
//! `LinkRecoveryDetected` on state changes the graph store itself
//! doesn't know how to narrate.

use std::net::Ipv4Addr;

use ndtwin_events::{
    EventBus, LinkFailurePayload, LinkRecoveryPayload, NdtEvent, SwitchTransitionPayload,
};
use ndtwin_graph::{GraphStore, VertexHandle};

/// Brings a switch up, emitting `SwitchEntered` only on a genuine
/// down-to-up transition (idempotent on a switch already up).
pub fn set_vertex_up(graph: &GraphStore, events: &EventBus, v: VertexHandle, agent_ip: Ipv4Addr) {
    let was_up = graph.with_vertex(v, |vertex| vertex.is_up);
    graph.set_vertex_up(v, true);
    if !was_up {
        let dpid = graph.with_vertex(v, |vertex| vertex.dpid);
        events.emit(NdtEvent::SwitchEntered(SwitchTransitionPayload { dpid, agent_ip }));
    }
}

/// Takes a switch down, emitting `SwitchExited` only on a genuine
/// up-to-down transition.
pub fn set_vertex_down(graph: &GraphStore, events: &EventBus, v: VertexHandle, agent_ip: Ipv4Addr) {
    let was_up = graph.with_vertex(v, |vertex| vertex.is_up);
    graph.set_vertex_up(v, false);
    if was_up {
        let dpid = graph.with_vertex(v, |vertex| vertex.dpid);
        events.emit(NdtEvent::SwitchExited(SwitchTransitionPayload { dpid, agent_ip }));
    }
}

/// Disables a switch and every incident edge, emitting
/// `LinkFailureDetected` for each edge that was up before the disable.
pub fn disable_switch_and_edges(graph: &GraphStore, events: &EventBus, dpid: u64) {
    let Some(v) = graph.find_vertex_by_dpid(dpid) else { return };
    let failed: Vec<(u64, u64)> = graph
        .out_edges(v)
        .into_iter()
        .filter_map(|e| graph.with_edge(e, |edge| edge.is_up.then_some((edge.src_dpid, edge.dst_dpid))))
        .collect();
    graph.disable_switch_and_edges(dpid);
    for (src_dpid, dst_dpid) in failed {
        events.emit(NdtEvent::LinkFailureDetected(LinkFailurePayload { src_dpid, dst_dpid }));
    }
}

/// Re-enables a switch and every incident edge, emitting
/// `LinkRecoveryDetected` for each edge that was down before the enable.
pub fn enable_switch_and_edges(graph: &GraphStore, events: &EventBus, dpid: u64) {
    let Some(v) = graph.find_vertex_by_dpid(dpid) else { return };
    let recovered: Vec<(u64, u64)> = graph
        .out_edges(v)
        .into_iter()
        .filter_map(|e| graph.with_edge(e, |edge| (!edge.is_up).then_some((edge.src_dpid, edge.dst_dpid))))
        .collect();
    graph.enable_switch_and_edges(dpid);
    for (src_dpid, dst_dpid) in recovered {
        events.emit(NdtEvent::LinkRecoveryDetected(LinkRecoveryPayload { src_dpid, dst_dpid }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndtwin_graph::Vertex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn set_vertex_up_emits_switch_entered_only_once() {
        let graph = GraphStore::new();
        let events = EventBus::new();
        let mut s1 = Vertex::new_switch(1);
        s1.dpid = 1;
        let v = graph.add_vertex(s1);

        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        events.register("SwitchEntered", Arc::new(move |_| { s.fetch_add(1, Ordering::SeqCst); }));

        set_vertex_up(&graph, &events, v, Ipv4Addr::new(10, 0, 0, 1));
        set_vertex_up(&graph, &events, v, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
