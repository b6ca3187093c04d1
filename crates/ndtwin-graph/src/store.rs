//! The Graph Store: an arena of vertices and directed edges with stable
//! handles, side-indexes for O(1) lookup, and a single readers-writer
//! lock guarding both the topology and every vertex/edge attribute.
//! Side-indexes are built on load and maintained on mutation, so the
//! hot lookup paths never scan the arenas.

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use ndtwin_common::{FlowKey, NdtError, NdtResult};
use parking_lot::RwLock;

use crate::edge::{Edge, EdgeHandle};
use crate::vertex::{Vertex, VertexHandle, VertexKind};

struct GraphInner {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    /// Outgoing edges per vertex, for BFS/forwarding walks.
    out_edges: Vec<Vec<EdgeHandle>>,
    /// The opposing directed edge for each edge, so link-state and
    /// bandwidth updates can touch both under one exclusive write.
    reverse_of: Vec<Option<EdgeHandle>>,

    by_ip: HashMap<Ipv4Addr, VertexHandle>,
    by_mac: HashMap<u64, VertexHandle>,
    by_dpid: HashMap<u64, VertexHandle>,
    by_name: HashMap<String, VertexHandle>,
    by_bridge_name: HashMap<String, VertexHandle>,
}

impl GraphInner {
    fn new() -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
            out_edges: Vec::new(),
            reverse_of: Vec::new(),
            by_ip: HashMap::new(),
            by_mac: HashMap::new(),
            by_dpid: HashMap::new(),
            by_name: HashMap::new(),
            by_bridge_name: HashMap::new(),
        }
    }

    fn add_vertex(&mut self, v: Vertex) -> VertexHandle {
        let handle = VertexHandle(self.vertices.len());
        for ip in &v.ip {
            self.by_ip.insert(*ip, handle);
        }
        if v.mac != 0 {
            self.by_mac.insert(v.mac, handle);
        }
        if v.kind == VertexKind::Switch {
            self.by_dpid.insert(v.dpid, handle);
        }
        if !v.device_name.is_empty() {
            self.by_name.insert(v.device_name.clone(), handle);
        }
        if let Some(b) = &v.bridge_name {
            self.by_bridge_name.insert(b.clone(), handle);
        }
        self.vertices.push(v);
        self.out_edges.push(Vec::new());
        handle
    }

    fn add_edge(&mut self, e: Edge) -> EdgeHandle {
        let handle = EdgeHandle(self.edges.len());
        self.out_edges[e.src.0].push(handle);
        self.edges.push(e);
        self.reverse_of.push(None);
        handle
    }

    fn link_reverse(&mut self, a: EdgeHandle, b: EdgeHandle) {
        self.reverse_of[a.0] = Some(b);
        self.reverse_of[b.0] = Some(a);
    }
}

/// A deep-copy snapshot of the topology for readers that want to release
/// the lock quickly (`GraphStore::get_graph`).
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    pub vertices: Vec<Vertex>,
    pub edges: Vec<Edge>,
}

/// The Graph Store. Cheaply cloneable (`Arc`-free here; callers wrap in
/// `Arc<GraphStore>` when sharing across tasks, matching how the rest of
/// the workspace shares its long-lived services).
pub struct GraphStore {
    inner: RwLock<GraphInner>,
    topology_file: Option<PathBuf>,
    configuration_file_lock: StdMutex<()>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner::new()),
            topology_file: None,
            configuration_file_lock: StdMutex::new(()),
        }
    }

    pub fn with_topology_file(path: impl AsRef<Path>) -> Self {
        Self {
            inner: RwLock::new(GraphInner::new()),
            topology_file: Some(path.as_ref().to_path_buf()),
            configuration_file_lock: StdMutex::new(()),
        }
    }

    // ---- construction (topology loader only) ----------------------------

    pub fn add_vertex(&self, v: Vertex) -> VertexHandle {
        self.inner.write().add_vertex(v)
    }

    pub fn add_edge(&self, e: Edge) -> EdgeHandle {
        self.inner.write().add_edge(e)
    }

    /// Records that `a` and `b` are the two opposing directed edges of one
    /// physical link.
    pub fn link_reverse(&self, a: EdgeHandle, b: EdgeHandle) {
        self.inner.write().link_reverse(a, b);
    }

    // ---- lookup -----------------------------------------------------------

    pub fn find_vertex_by_ip(&self, ip: Ipv4Addr) -> Option<VertexHandle> {
        self.inner.read().by_ip.get(&ip).copied()
    }

    pub fn find_vertex_by_mac(&self, mac: u64) -> Option<VertexHandle> {
        self.inner.read().by_mac.get(&mac).copied()
    }

    pub fn find_vertex_by_dpid(&self, dpid: u64) -> Option<VertexHandle> {
        self.inner.read().by_dpid.get(&dpid).copied()
    }

    pub fn find_vertex_by_name(&self, name: &str) -> Option<VertexHandle> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn find_vertex_by_bridge_name(&self, bridge_name: &str) -> Option<VertexHandle> {
        self.inner.read().by_bridge_name.get(bridge_name).copied()
    }

    pub fn find_edge_by_dpid_and_port(&self, dpid: u64, port: u32) -> Option<EdgeHandle> {
        let g = self.inner.read();
        g.edges
            .iter()
            .position(|e| e.src_dpid == dpid && e.src_interface == port)
            .map(EdgeHandle)
    }

    pub fn find_edge_by_agent_and_port(&self, agent_ip: Ipv4Addr, port: u32) -> Option<EdgeHandle> {
        let g = self.inner.read();
        g.edges
            .iter()
            .position(|e| e.src_ip.contains(&agent_ip) && e.src_interface == port)
            .map(EdgeHandle)
    }

    pub fn find_edge_by_src_dst_dpid(&self, src_dpid: u64, dst_dpid: u64) -> Option<EdgeHandle> {
        let g = self.inner.read();
        g.edges
            .iter()
            .position(|e| e.src_dpid == src_dpid && e.dst_dpid == dst_dpid)
            .map(EdgeHandle)
    }

    pub fn find_edge_by_host_ip(&self, host_ip: Ipv4Addr) -> Option<EdgeHandle> {
        let g = self.inner.read();
        g.edges
            .iter()
            .position(|e| e.src_ip.contains(&host_ip) || e.dst_ip.contains(&host_ip))
            .map(EdgeHandle)
    }

    pub fn find_edge_by_src_dst_ip(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Option<EdgeHandle> {
        let g = self.inner.read();
        g.edges
            .iter()
            .position(|e| e.src_ip.contains(&src_ip) && e.dst_ip.contains(&dst_ip))
            .map(EdgeHandle)
    }

    /// Outgoing edges of `v`, for forwarding/BFS walks.
    pub fn out_edges(&self, v: VertexHandle) -> Vec<EdgeHandle> {
        self.inner.read().out_edges[v.0].clone()
    }

    pub fn vertex_count(&self) -> usize {
        self.inner.read().vertices.len()
    }

    // ---- read (single attribute access, with "no-lock" siblings) --------

    pub fn with_vertex<R>(&self, v: VertexHandle, f: impl FnOnce(&Vertex) -> R) -> R {
        f(&self.inner.read().vertices[v.0])
    }

    pub fn with_edge<R>(&self, e: EdgeHandle, f: impl FnOnce(&Edge) -> R) -> R {
        f(&self.inner.read().edges[e.0])
    }

    pub fn read(&self) -> GraphReadGuard<'_> {
        GraphReadGuard(self.inner.read())
    }

    // ---- mutate -------------------------------------------------------

    pub fn set_vertex_up(&self, v: VertexHandle, up: bool) {
        self.inner.write().vertices[v.0].is_up = up;
    }

    pub fn set_vertex_enabled(&self, v: VertexHandle, enabled: bool) {
        self.inner.write().vertices[v.0].is_enabled = enabled;
    }

    pub fn set_edge_up(&self, e: EdgeHandle, up: bool) {
        self.inner.write().edges[e.0].is_up = up;
    }

    pub fn set_edge_enabled(&self, e: EdgeHandle, enabled: bool) {
        self.inner.write().edges[e.0].is_enabled = enabled;
    }

    pub fn set_bridge_ports(&self, v: VertexHandle, ports: Vec<String>) {
        self.inner.write().vertices[v.0].bridge_connected_ports = ports;
    }

    /// Updates residual bandwidth/usage/utilisation on `e` and its
    /// reverse edge under a single exclusive write; the two directions
    /// of a link must never be observed disagreeing.
    pub fn update_link_info(
        &self,
        e: EdgeHandle,
        left_bandwidth: u64,
        usage: u64,
        utilization: f64,
    ) {
        let mut g = self.inner.write();
        let link_bandwidth = g.edges[e.0].link_bandwidth;
        let reverse = g.reverse_of[e.0];

        let apply = |edge: &mut Edge| {
            edge.left_bandwidth = left_bandwidth;
            edge.link_bandwidth_usage = usage;
            edge.link_bandwidth_utilization = utilization;
            edge.link_bandwidth = link_bandwidth;
        };
        apply(&mut g.edges[e.0]);
        if let Some(r) = reverse {
            apply(&mut g.edges[r.0]);
        }
    }

    /// Marks the switch vertex and every incident edge (both directions)
    /// disabled, in one exclusive section.
    pub fn disable_switch_and_edges(&self, dpid: u64) {
        let mut g = self.inner.write();
        let Some(v) = g.by_dpid.get(&dpid).copied() else {
            return;
        };
        g.vertices[v.0].is_enabled = false;
        g.vertices[v.0].is_up = false;
        let incident = Self::incident_edges(&g, v);
        for eh in incident {
            g.edges[eh.0].is_enabled = false;
            g.edges[eh.0].is_up = false;
        }
    }

    pub fn enable_switch_and_edges(&self, dpid: u64) {
        let mut g = self.inner.write();
        let Some(v) = g.by_dpid.get(&dpid).copied() else {
            return;
        };
        g.vertices[v.0].is_enabled = true;
        let incident = Self::incident_edges(&g, v);
        for eh in incident {
            g.edges[eh.0].is_enabled = true;
        }
    }

    fn incident_edges(g: &GraphInner, v: VertexHandle) -> Vec<EdgeHandle> {
        let mut set: Vec<EdgeHandle> = g.out_edges[v.0].clone();
        for (idx, edge) in g.edges.iter().enumerate() {
            if edge.dst == v {
                set.push(EdgeHandle(idx));
            }
        }
        set
    }

    /// Inserts or refreshes `(flowKey → now)` on `e`'s flow set, returning
    /// whether the key was new.
    pub fn touch_edge_flow(&self, e: EdgeHandle, key: FlowKey) -> bool {
        self.inner.write().edges[e.0].touch_flow(key)
    }

    /// Removes flow-set entries older than `ttl_ms` from every edge.
    pub fn sweep_flow_ttl(&self, ttl_ms: u64) {
        let mut g = self.inner.write();
        for edge in &mut g.edges {
            edge.sweep_expired(ttl_ms);
        }
    }

    // ---- scan -----------------------------------------------------------

    pub fn get_graph(&self) -> GraphSnapshot {
        let g = self.inner.read();
        GraphSnapshot {
            vertices: g.vertices.clone(),
            edges: g.edges.clone(),
        }
    }

    // ---- persistence ------------------------------------------------------

    /// Sets `deviceName` in memory and persists it to the topology file
    /// using a temp-file-then-rename under `configurationFileLock`. If no
    /// topology file is configured, persistence is skipped (tests, or a
    /// store built programmatically).
    pub fn set_device_name(&self, v: VertexHandle, name: String) -> NdtResult<()> {
        self.inner.write().vertices[v.0].device_name = name.clone();
        self.persist_name_field(v, "device_name", &name)
    }

    pub fn set_nick_name(&self, v: VertexHandle, name: String) -> NdtResult<()> {
        self.inner.write().vertices[v.0].nick_name = name.clone();
        self.persist_name_field(v, "nickname", &name)
    }

    fn persist_name_field(&self, v: VertexHandle, field: &str, value: &str) -> NdtResult<()> {
        let Some(path) = &self.topology_file else {
            return Ok(());
        };
        let _guard = self
            .configuration_file_lock
            .lock()
            .map_err(|_| NdtError::ConfigDrift("topology file lock poisoned".into()))?;

        let raw = fs::read_to_string(path)?;
        let mut doc: serde_json::Value = serde_json::from_str(&raw)?;
        let dpid = self.with_vertex(v, |vertex| vertex.dpid);
        let name = self.with_vertex(v, |vertex| vertex.device_name.clone());

        let nodes = doc
            .get_mut("nodes")
            .and_then(|n| n.as_array_mut())
            .ok_or_else(|| NdtError::Parse("topology file missing nodes array".into()))?;

        let node = nodes
            .iter_mut()
            .find(|n| n.get("dpid").and_then(|d| d.as_u64()) == Some(dpid))
            .ok_or_else(|| NdtError::ConfigDrift(format!("dpid {dpid} absent from topology file")))?;
        node[field] = serde_json::Value::String(value.to_string());

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(&doc)?)?;
        fs::rename(&tmp_path, path)?;

        if field == "device_name" && name != value {
            return Err(NdtError::ConfigDrift(
                "in-memory device name diverged from file write".into(),
            ));
        }
        Ok(())
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A held read guard, passed to the "no-lock" lookup siblings so callers
/// that already hold the lock avoid re-acquiring it.
pub struct GraphReadGuard<'a>(parking_lot::RwLockReadGuard<'a, GraphInner>);

impl GraphReadGuard<'_> {
    pub fn find_vertex_by_ip(&self, ip: Ipv4Addr) -> Option<VertexHandle> {
        self.0.by_ip.get(&ip).copied()
    }

    pub fn find_vertex_by_dpid(&self, dpid: u64) -> Option<VertexHandle> {
        self.0.by_dpid.get(&dpid).copied()
    }

    pub fn vertex(&self, v: VertexHandle) -> &Vertex {
        &self.0.vertices[v.0]
    }

    pub fn edge(&self, e: EdgeHandle) -> &Edge {
        &self.0.edges[e.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge as GraphEdge;
    use crate::vertex::Vertex;
    use std::net::Ipv4Addr;

    fn build_link(store: &GraphStore, sw1: VertexHandle, sw2: VertexHandle) -> (EdgeHandle, EdgeHandle) {
        let fwd = store.add_edge(GraphEdge::new(sw1, sw2));
        let rev = store.add_edge(GraphEdge::new(sw2, sw1));
        store.link_reverse(fwd, rev);
        (fwd, rev)
    }

    #[test]
    fn update_link_info_keeps_forward_and_reverse_bandwidth_equal() {
        let store = GraphStore::new();
        let mut s1 = Vertex::new_switch(1);
        s1.dpid = 1;
        let mut s2 = Vertex::new_switch(2);
        s2.dpid = 2;
        let v1 = store.add_vertex(s1);
        let v2 = store.add_vertex(s2);
        let (fwd, rev) = build_link(&store, v1, v2);

        store.update_link_info(fwd, 500_000, 500_000, 50.0);

        let (lb_fwd, usage_fwd) = store.with_edge(fwd, |e| (e.link_bandwidth, e.link_bandwidth_usage));
        let (lb_rev, usage_rev) = store.with_edge(rev, |e| (e.link_bandwidth, e.link_bandwidth_usage));
        assert_eq!(lb_fwd, lb_rev);
        assert_eq!(usage_fwd, usage_rev);
    }

    #[test]
    fn disable_switch_and_edges_marks_vertex_and_all_incident_edges() {
        let store = GraphStore::new();
        let mut s1 = Vertex::new_switch(1);
        s1.dpid = 1;
        let mut s2 = Vertex::new_switch(2);
        s2.dpid = 2;
        let v1 = store.add_vertex(s1);
        let v2 = store.add_vertex(s2);
        let (fwd, rev) = build_link(&store, v1, v2);
        store.set_edge_enabled(fwd, true);
        store.set_edge_enabled(rev, true);
        store.set_vertex_enabled(v1, true);

        store.disable_switch_and_edges(1);

        assert!(!store.with_vertex(v1, |v| v.is_enabled));
        assert!(!store.with_edge(fwd, |e| e.is_enabled));
        assert!(!store.with_edge(rev, |e| e.is_enabled));
    }

    #[test]
    fn touch_edge_flow_reports_new_then_refreshed() {
        let store = GraphStore::new();
        let v1 = store.add_vertex(Vertex::new_switch(1));
        let v2 = store.add_vertex(Vertex::new_switch(2));
        let e = store.add_edge(GraphEdge::new(v1, v2));
        let key = FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 2),
            Ipv4Addr::new(10, 0, 0, 3),
            4444,
            80,
            6,
        );

        assert!(store.touch_edge_flow(e, key));
        assert!(!store.touch_edge_flow(e, key));
    }

    #[test]
    fn get_graph_returns_independent_snapshot() {
        let store = GraphStore::new();
        let v1 = store.add_vertex(Vertex::new_switch(1));
        let v2 = store.add_vertex(Vertex::new_switch(2));
        store.add_edge(GraphEdge::new(v1, v2));

        let snap = store.get_graph();
        assert_eq!(snap.vertices.len(), 2);
        assert_eq!(snap.edges.len(), 1);

        store.set_vertex_up(v1, true);
        assert!(!snap.vertices[v1.0].is_up);
    }

    #[test]
    fn device_name_edit_is_persisted_back_to_the_topology_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        fs::write(
            &path,
            serde_json::json!({"nodes": [{"vertex_type": 0, "dpid": 7}], "edges": []}).to_string(),
        )
        .unwrap();

        let store = GraphStore::with_topology_file(&path);
        let v = store.add_vertex(Vertex::new_switch(7));
        store.set_device_name(v, "spine-7".into()).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["nodes"][0]["device_name"], "spine-7");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn persisting_a_name_for_a_dpid_missing_from_the_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        fs::write(
            &path,
            serde_json::json!({"nodes": [{"vertex_type": 0, "dpid": 1}], "edges": []}).to_string(),
        )
        .unwrap();

        let store = GraphStore::with_topology_file(&path);
        let v = store.add_vertex(Vertex::new_switch(42));
        assert!(store.set_device_name(v, "ghost".into()).is_err());
    }

    #[test]
    fn lookup_by_dpid_and_ip() {
        let store = GraphStore::new();
        let mut sw = Vertex::new_switch(7);
        sw.dpid = 7;
        sw.ip.push(Ipv4Addr::new(10, 0, 0, 1));
        let v = store.add_vertex(sw);

        assert_eq!(store.find_vertex_by_dpid(7), Some(v));
        assert_eq!(store.find_vertex_by_ip(Ipv4Addr::new(10, 0, 0, 1)), Some(v));
        assert_eq!(store.find_vertex_by_dpid(99), None);
    }
}
