//! All-paths-to-destination BFS: an outward walk from a destination
//! host that records, for every switch that can reach it, the output
//! port to forward through. The same parent chain yields both the
//! per-dpid forwarding rules and the per-source forward paths the
//! collector's path map is seeded from.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;

use ndtwin_graph::GraphStore;

const FORWARDING_RULE_PRIORITY: u16 = 100;

/// One derived forwarding rule: "on this switch, packets destined for
/// `dst_net/mask` go out `out_port`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardingRule {
    pub dpid: u64,
    pub out_port: u32,
    pub dst_net: u32,
    pub mask: u32,
    pub priority: u16,
}

/// One element of a reconstructed forward path: the source and
/// destination hosts bracket the switch hops, each switch carrying the
/// output port the packet leaves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathNode {
    Host(Ipv4Addr),
    Switch { dpid: u64, out_port: u32 },
}

/// Deterministic tie-break between two equally-short candidate edges
/// for the same switch. Hashing the destination and switch alone is
/// constant across the candidates being compared, so the candidate's
/// own output port is mixed in too; that spreads destinations across
/// equal-cost neighbours without any per-flow state.
fn tie_break_hash(dst_ip: Ipv4Addr, dpid: u64, out_port: u32) -> u64 {
    const K: u64 = 0x517cc1b727220a95;
    let mut h = (u32::from(dst_ip) as u64).wrapping_mul(K);
    h ^= dpid.wrapping_mul(K).rotate_left(17);
    h ^= (out_port as u64).wrapping_mul(K).rotate_left(37);
    h
}

/// The BFS result: for every vertex that can reach the destination, the
/// chosen outgoing edge of its shortest path.
struct ReachTree {
    snapshot: ndtwin_graph::GraphSnapshot,
    dst_idx: usize,
    chosen_edge: Vec<Option<usize>>,
}

/// Walks outward from `dst_ip` along reversed edges, recording for each
/// reachable vertex the edge its traffic should leave through. Returns
/// `None` if `dst_ip` is not a known vertex.
fn grow_reach_tree(graph: &GraphStore, dst_ip: Ipv4Addr) -> Option<ReachTree> {
    let dst_vertex = graph.find_vertex_by_ip(dst_ip)?;
    let snapshot = graph.get_graph();
    let n = snapshot.vertices.len();
    let dst_idx = dst_vertex.index();

    let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (edge_idx, edge) in snapshot.edges.iter().enumerate() {
        incoming[edge.dst.index()].push(edge_idx);
    }

    let mut visited = vec![false; n];
    let mut depth = vec![usize::MAX; n];
    let mut chosen_edge: Vec<Option<usize>> = vec![None; n];
    visited[dst_idx] = true;
    depth[dst_idx] = 0;

    let mut queue = VecDeque::new();
    queue.push_back(dst_idx);

    while let Some(cur) = queue.pop_front() {
        for &edge_idx in &incoming[cur] {
            let edge = &snapshot.edges[edge_idx];
            let neighbor = edge.src.index();

            if !visited[neighbor] {
                visited[neighbor] = true;
                depth[neighbor] = depth[cur] + 1;
                chosen_edge[neighbor] = Some(edge_idx);
                queue.push_back(neighbor);
            } else if depth[neighbor] == depth[cur] + 1 {
                let existing = chosen_edge[neighbor].map(|i| &snapshot.edges[i]);
                let dpid = snapshot.vertices[neighbor].dpid;
                let candidate_wins = match existing {
                    None => true,
                    Some(existing_edge) => {
                        tie_break_hash(dst_ip, dpid, edge.src_interface)
                            < tie_break_hash(dst_ip, dpid, existing_edge.src_interface)
                    }
                };
                if candidate_wins {
                    chosen_edge[neighbor] = Some(edge_idx);
                }
            }
        }
    }

    Some(ReachTree {
        snapshot,
        dst_idx,
        chosen_edge,
    })
}

impl ReachTree {
    /// Reconstructs the forward path from `src_idx` to the destination
    /// as `[srcIP, (dpid, outPort)*, dstIP]`. Returns `None` when the
    /// source never made it into the tree (disconnected) or the parent
    /// chain is broken.
    fn forward_path(
        &self,
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        src_idx: usize,
    ) -> Option<Vec<PathNode>> {
        let mut path = vec![PathNode::Host(src_ip)];
        let mut cur = src_idx;
        // A shortest path visits each vertex at most once; anything
        // longer means the chain is corrupt, so give up rather than spin.
        for _ in 0..=self.snapshot.vertices.len() {
            if cur == self.dst_idx {
                path.push(PathNode::Host(dst_ip));
                return Some(path);
            }
            let edge_idx = self.chosen_edge[cur]?;
            let edge = &self.snapshot.edges[edge_idx];
            let vertex = &self.snapshot.vertices[cur];
            if vertex.dpid != 0 {
                path.push(PathNode::Switch {
                    dpid: vertex.dpid,
                    out_port: edge.src_interface,
                });
            }
            cur = edge.dst.index();
        }
        None
    }
}

/// Computes the forwarding rules every switch needs to route toward
/// `dst_ip`, via a BFS that starts at the destination and walks
/// backwards along incoming edges. Returns an empty vector if `dst_ip`
/// is not a known vertex or is unreachable from the rest of the
/// topology; a disconnected graph never panics.
pub fn compute_forwarding_rules(graph: &GraphStore, dst_ip: Ipv4Addr) -> Vec<ForwardingRule> {
    let Some(tree) = grow_reach_tree(graph, dst_ip) else {
        return Vec::new();
    };

    let mut rules = Vec::new();
    for (idx, vertex) in tree.snapshot.vertices.iter().enumerate() {
        if idx == tree.dst_idx {
            continue;
        }
        let Some(edge_idx) = tree.chosen_edge[idx] else { continue };
        if vertex.dpid == 0 {
            continue;
        }
        let edge = &tree.snapshot.edges[edge_idx];
        rules.push(ForwardingRule {
            dpid: vertex.dpid,
            out_port: edge.src_interface,
            dst_net: u32::from(dst_ip),
            mask: u32::MAX,
            priority: FORWARDING_RULE_PRIORITY,
        });
    }
    rules
}

/// Reconstructs, for every source host in `src_ips`, the forward path
/// to `dst_ip` as `[srcIP, (dpid, outPort)*, dstIP]`. Sources the BFS
/// never reached (disconnected, or unknown to the graph) are simply
/// absent from the result; an unknown destination yields an empty map.
pub fn compute_all_paths_to_dst(
    graph: &GraphStore,
    dst_ip: Ipv4Addr,
    src_ips: &[Ipv4Addr],
) -> HashMap<Ipv4Addr, Vec<PathNode>> {
    let mut paths = HashMap::new();
    let Some(tree) = grow_reach_tree(graph, dst_ip) else {
        return paths;
    };
    for &src_ip in src_ips {
        if src_ip == dst_ip {
            continue;
        }
        let Some(handle) = graph.find_vertex_by_ip(src_ip) else {
            continue;
        };
        if let Some(path) = tree.forward_path(src_ip, dst_ip, handle.index()) {
            paths.insert(src_ip, path);
        }
    }
    paths
}

/// Computes forwarding rules for every destination in `dsts`, deduping
/// identical `(dpid, dst_net, mask, priority)` entries across calls.
pub fn compute_all_paths_rules(graph: &GraphStore, dsts: &[Ipv4Addr]) -> Vec<ForwardingRule> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &dst in dsts {
        for rule in compute_forwarding_rules(graph, dst) {
            let key = (rule.dpid, rule.dst_net, rule.mask, rule.priority);
            if seen.insert(key) {
                out.push(rule);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndtwin_graph::{Edge, Vertex};

    /// h1 -- s1 -- s2 -- h2, each link bidirectional.
    fn linear_topology() -> (GraphStore, Ipv4Addr, Ipv4Addr) {
        let store = GraphStore::new();
        let mut h1 = Vertex::new_host();
        h1.ip = vec![Ipv4Addr::new(10, 0, 0, 1)];
        let mut s1 = Vertex::new_switch(1);
        s1.dpid = 1;
        let mut s2 = Vertex::new_switch(2);
        s2.dpid = 2;
        let mut h2 = Vertex::new_host();
        h2.ip = vec![Ipv4Addr::new(10, 0, 0, 2)];

        let vh1 = store.add_vertex(h1);
        let vs1 = store.add_vertex(s1);
        let vs2 = store.add_vertex(s2);
        let vh2 = store.add_vertex(h2);

        let mut link = |src, dst, src_if, dst_if| {
            let mut fwd = Edge::new(src, dst);
            fwd.src_interface = src_if;
            fwd.dst_interface = dst_if;
            let mut rev = Edge::new(dst, src);
            rev.src_interface = dst_if;
            rev.dst_interface = src_if;
            let f = store.add_edge(fwd);
            let r = store.add_edge(rev);
            store.link_reverse(f, r);
        };
        link(vh1, vs1, 0, 1);
        link(vs1, vs2, 2, 1);
        link(vs2, vh2, 2, 0);

        (store, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
    }

    #[test]
    fn s6_bfs_finds_shortest_path_on_a_linear_topology() {
        let (store, _h1_ip, h2_ip) = linear_topology();
        let rules = compute_forwarding_rules(&store, h2_ip);
        assert_eq!(rules.len(), 2);
        let by_dpid: std::collections::HashMap<u64, &ForwardingRule> =
            rules.iter().map(|r| (r.dpid, r)).collect();
        assert_eq!(by_dpid[&1].out_port, 2);
        assert_eq!(by_dpid[&2].out_port, 2);
        assert!(rules.iter().all(|r| r.priority == 100));
    }

    #[test]
    fn s6_forward_path_brackets_switch_hops_with_the_host_endpoints() {
        let (store, h1_ip, h2_ip) = linear_topology();
        let paths = compute_all_paths_to_dst(&store, h2_ip, &[h1_ip]);
        assert_eq!(
            paths[&h1_ip],
            vec![
                PathNode::Host(h1_ip),
                PathNode::Switch { dpid: 1, out_port: 2 },
                PathNode::Switch { dpid: 2, out_port: 2 },
                PathNode::Host(h2_ip),
            ]
        );
    }

    #[test]
    fn disconnected_source_gets_no_path_without_panicking() {
        let (store, h1_ip, h2_ip) = linear_topology();
        let lone_ip = Ipv4Addr::new(10, 0, 0, 9);
        let mut lone = Vertex::new_host();
        lone.ip = vec![lone_ip];
        store.add_vertex(lone);

        let paths = compute_all_paths_to_dst(&store, h2_ip, &[h1_ip, lone_ip]);
        assert!(paths.contains_key(&h1_ip));
        assert!(!paths.contains_key(&lone_ip));
    }

    #[test]
    fn unknown_destination_yields_an_empty_path_map() {
        let (store, h1_ip, _h2_ip) = linear_topology();
        let paths = compute_all_paths_to_dst(&store, Ipv4Addr::new(9, 9, 9, 9), &[h1_ip]);
        assert!(paths.is_empty());
    }

    #[test]
    fn disconnected_destination_returns_no_rules_without_panicking() {
        let store = GraphStore::new();
        let mut isolated = Vertex::new_host();
        isolated.ip = vec![Ipv4Addr::new(9, 9, 9, 9)];
        store.add_vertex(isolated);
        let rules = compute_forwarding_rules(&store, Ipv4Addr::new(9, 9, 9, 9));
        assert!(rules.is_empty());
    }

    #[test]
    fn unknown_destination_returns_no_rules() {
        let store = GraphStore::new();
        let rules = compute_forwarding_rules(&store, Ipv4Addr::new(1, 2, 3, 4));
        assert!(rules.is_empty());
    }

    #[test]
    fn dedup_keeps_a_single_entry_across_repeated_destinations() {
        let (store, _h1_ip, h2_ip) = linear_topology();
        let rules = compute_all_paths_rules(&store, &[h2_ip, h2_ip]);
        assert_eq!(rules.len(), 2);
    }
}
