//! Classifier-driven flow path walk: given a flow's 5-tuple and its
//! ingress switch, repeatedly consult the classifier's forwarding
//! decision and the graph store's adjacency to trace the hop sequence a
//! flow actually takes.

use std::net::Ipv4Addr;

use ndtwin_classifier::{CanonicalKey, Classifier};
use ndtwin_graph::GraphStore;

use crate::pathmap::Path;

const MAX_HOPS: usize = 100;
const IPV4_ETH_TYPE: u16 = 0x0800;

/// Walks the classifier-determined forwarding path for `(src_ip, dst_ip)`
/// starting at `start_dpid`, stopping at `MAX_HOPS` to bound cycles in a
/// misconfigured topology. Returns `None` if the first hop can't be
/// resolved at all; a path that dead-ends partway through is still
/// returned up to the point it got to.
pub fn trace_flow_path(
    classifier: &Classifier,
    graph: &GraphStore,
    start_dpid: u64,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
) -> Option<Path> {
    let mut path = Path::new();
    let mut dpid = start_dpid;
    let key = CanonicalKey {
        eth_type: IPV4_ETH_TYPE,
        ipv4_src: u32::from(src_ip),
        ipv4_dst: u32::from(dst_ip),
        ..CanonicalKey::default()
    };

    for _ in 0..MAX_HOPS {
        let effect = classifier.lookup(dpid, &key, 0)?;
        let Some(&out_port) = effect.output_ports.first() else {
            break;
        };
        path.push((dpid, out_port));

        let Some(edge) = graph.find_edge_by_dpid_and_port(dpid, out_port) else {
            break;
        };
        let (next_dpid, reached_dst) = graph.with_edge(edge, |e| {
            (e.dst_dpid, e.dst_ip.contains(&dst_ip))
        });
        if reached_dst || next_dpid == 0 || next_dpid == dpid {
            break;
        }
        dpid = next_dpid;
    }

    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}
