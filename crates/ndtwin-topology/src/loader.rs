//! Static topology loader: parses the node/edge JSON document into a
//! populated `GraphStore`, resolving `dpid == 0` edge endpoints by IP.

use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use ndtwin_common::{NdtError, NdtResult};
use ndtwin_graph::{Edge, EcmpGroup, EcmpMember, GraphStore, Vertex, VertexHandle, VertexKind};
use serde_json::Value;

/// Loads a topology file from disk, populating a fresh `GraphStore`
/// configured to persist name-field edits back to this same file.
pub fn load(path: impl AsRef<Path>) -> NdtResult<GraphStore> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let doc: Value = serde_json::from_str(&raw)?;
    let store = GraphStore::with_topology_file(path);
    populate(&store, &doc)?;
    Ok(store)
}

/// Parses `doc` into `store` without any file association, for callers
/// that already have the document in memory.
pub fn load_into_memory(doc: &Value) -> NdtResult<GraphStore> {
    let store = GraphStore::new();
    populate(&store, doc)?;
    Ok(store)
}

fn populate(store: &GraphStore, doc: &Value) -> NdtResult<()> {
    let nodes = doc
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| NdtError::Parse("topology file missing nodes array".into()))?;
    for node in nodes {
        store.add_vertex(parse_node(node)?);
    }

    let edges = doc
        .get("edges")
        .and_then(Value::as_array)
        .ok_or_else(|| NdtError::Parse("topology file missing edges array".into()))?;
    for edge in edges {
        add_edge_pair(store, edge)?;
    }

    Ok(())
}

fn parse_node(node: &Value) -> NdtResult<Vertex> {
    let kind = match node.get("vertex_type").and_then(Value::as_u64) {
        Some(0) => VertexKind::Switch,
        Some(1) => VertexKind::Host,
        Some(other) => {
            return Err(NdtError::UnknownValue {
                field: "vertex_type",
                value: other.to_string(),
            })
        }
        None => return Err(NdtError::MissingField("vertex_type")),
    };

    let mut vertex = match kind {
        VertexKind::Switch => Vertex::new_switch(node.get("dpid").and_then(Value::as_u64).unwrap_or(0)),
        VertexKind::Host => Vertex::new_host(),
    };

    // MAC arrives as a plain integer; colon-separated strings are
    // tolerated for hand-written fixtures.
    vertex.mac = match node.get("mac") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => u64::from_str_radix(&s.replace(':', ""), 16).unwrap_or(0),
        _ => 0,
    };
    vertex.ip = node
        .get("ip")
        .and_then(Value::as_array)
        .map(|ips| {
            ips.iter()
                .filter_map(Value::as_str)
                .filter_map(|s| Ipv4Addr::from_str(s).ok())
                .collect()
        })
        .unwrap_or_default();
    vertex.device_name = node
        .get("device_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    vertex.nick_name = node
        .get("nickname")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    vertex.brand_name = node
        .get("brand_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    vertex.device_layer = node.get("device_layer").and_then(Value::as_i64).unwrap_or(-1) as i32;
    vertex.bridge_name = node.get("bridge_name").and_then(Value::as_str).map(str::to_string);
    vertex.smart_plug_ip = node
        .get("smart_plug_ip")
        .and_then(Value::as_str)
        .and_then(|s| Ipv4Addr::from_str(s).ok());
    vertex.smart_plug_outlet = node
        .get("smart_plug_outlet")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    vertex.ecmp_groups = node
        .get("ecmp_groups")
        .and_then(Value::as_array)
        .map(|groups| groups.iter().map(parse_ecmp_group).collect())
        .unwrap_or_default();

    // Initial state is always down and disabled; the reachability
    // pinger and status poller bring switches up after their first
    // successful check.
    vertex.is_up = false;
    vertex.is_enabled = false;

    Ok(vertex)
}

fn parse_ecmp_group(group: &Value) -> EcmpGroup {
    let members = group
        .get("members")
        .and_then(Value::as_array)
        .map(|members| {
            members
                .iter()
                .filter_map(|m| m.get("port_id").and_then(Value::as_u64))
                .map(|port_id| EcmpMember::Port { port_id: port_id as u32 })
                .collect()
        })
        .unwrap_or_default();
    EcmpGroup { members }
}

fn resolve_endpoint(store: &GraphStore, dpid: u64, ips: &[Ipv4Addr]) -> Option<VertexHandle> {
    if dpid != 0 {
        store.find_vertex_by_dpid(dpid)
    } else {
        ips.iter().find_map(|ip| store.find_vertex_by_ip(*ip))
    }
}

fn parse_ip_list(edge: &Value, field: &str) -> Vec<Ipv4Addr> {
    edge.get(field)
        .and_then(Value::as_array)
        .map(|ips| {
            ips.iter()
                .filter_map(Value::as_str)
                .filter_map(|s| Ipv4Addr::from_str(s).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn add_edge_pair(store: &GraphStore, edge_doc: &Value) -> NdtResult<()> {
    let src_dpid = edge_doc.get("src_dpid").and_then(Value::as_u64).unwrap_or(0);
    let dst_dpid = edge_doc.get("dst_dpid").and_then(Value::as_u64).unwrap_or(0);
    let src_ip = parse_ip_list(edge_doc, "src_ip");
    let dst_ip = parse_ip_list(edge_doc, "dst_ip");
    let src_interface = edge_doc.get("src_interface").and_then(Value::as_u64).unwrap_or(0) as u32;
    let dst_interface = edge_doc.get("dst_interface").and_then(Value::as_u64).unwrap_or(0) as u32;
    let link_bandwidth = edge_doc
        .get("link_bandwidth_bps")
        .and_then(Value::as_u64)
        .unwrap_or(ndtwin_common::MININET_INTERFACE_SPEED_BPS);

    let src = resolve_endpoint(store, src_dpid, &src_ip)
        .ok_or_else(|| NdtError::ConfigDrift(format!("edge src (dpid {src_dpid}) not found among nodes")))?;
    let dst = resolve_endpoint(store, dst_dpid, &dst_ip)
        .ok_or_else(|| NdtError::ConfigDrift(format!("edge dst (dpid {dst_dpid}) not found among nodes")))?;

    let mut fwd = Edge::new(src, dst);
    fwd.link_bandwidth = link_bandwidth;
    fwd.left_bandwidth = link_bandwidth;
    fwd.left_bandwidth_from_flow_sample = link_bandwidth;
    fwd.src_ip = src_ip.clone();
    fwd.src_dpid = src_dpid;
    fwd.src_interface = src_interface;
    fwd.dst_ip = dst_ip.clone();
    fwd.dst_dpid = dst_dpid;
    fwd.dst_interface = dst_interface;

    let mut rev = Edge::new(dst, src);
    rev.link_bandwidth = link_bandwidth;
    rev.left_bandwidth = link_bandwidth;
    rev.left_bandwidth_from_flow_sample = link_bandwidth;
    rev.src_ip = dst_ip;
    rev.src_dpid = dst_dpid;
    rev.src_interface = dst_interface;
    rev.dst_ip = src_ip;
    rev.dst_dpid = src_dpid;
    rev.dst_interface = src_interface;

    let fwd_handle = store.add_edge(fwd);
    let rev_handle = store.add_edge(rev);
    store.link_reverse(fwd_handle, rev_handle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "nodes": [
                {"vertex_type": 0, "dpid": 1, "device_name": "s1"},
                {"vertex_type": 0, "dpid": 2, "device_name": "s2"},
                {"vertex_type": 1, "ip": ["10.0.0.5"], "device_name": "h1"}
            ],
            "edges": [
                {"link_bandwidth_bps": 1000000000, "src_dpid": 1, "src_interface": 1, "dst_dpid": 2, "dst_interface": 1},
                {"link_bandwidth_bps": 1000000000, "src_dpid": 2, "src_interface": 2, "dst_dpid": 0, "dst_ip": ["10.0.0.5"], "dst_interface": 3}
            ]
        })
    }

    #[test]
    fn loads_nodes_and_edges_and_resolves_dpid_zero_by_ip() {
        let store = load_into_memory(&sample_doc()).unwrap();
        assert_eq!(store.vertex_count(), 3);
        let s1 = store.find_vertex_by_dpid(1).unwrap();
        let s2 = store.find_vertex_by_dpid(2).unwrap();
        let h1 = store.find_vertex_by_ip(Ipv4Addr::new(10, 0, 0, 5)).unwrap();
        assert_eq!(store.out_edges(s1).len(), 1);
        assert_eq!(store.out_edges(s2).len(), 2);
        assert_eq!(store.out_edges(h1).len(), 0);
    }

    #[test]
    fn nodes_start_down_and_disabled() {
        let store = load_into_memory(&sample_doc()).unwrap();
        let s1 = store.find_vertex_by_dpid(1).unwrap();
        store.with_vertex(s1, |v| {
            assert!(!v.is_up);
            assert!(!v.is_enabled);
        });
    }

    #[test]
    fn testbed_smart_plug_fields_are_carried_onto_the_vertex() {
        let doc = json!({
            "nodes": [
                {"vertex_type": 0, "dpid": 1, "smart_plug_ip": "192.168.0.50", "smart_plug_outlet": 3}
            ],
            "edges": []
        });
        let store = load_into_memory(&doc).unwrap();
        let v = store.find_vertex_by_dpid(1).unwrap();
        store.with_vertex(v, |vertex| {
            assert_eq!(vertex.smart_plug_ip, Some(Ipv4Addr::new(192, 168, 0, 50)));
            assert_eq!(vertex.smart_plug_outlet, 3);
        });
    }

    #[test]
    fn missing_nodes_array_is_an_error() {
        let doc = json!({"edges": []});
        assert!(load_into_memory(&doc).is_err());
    }
}
