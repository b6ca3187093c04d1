//! `(srcIp, dstIp) -> Path` attribution, held under its own lock so path
//! lookups never contend with the graph lock.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use parking_lot::RwLock;

/// One hop: the datapath traversed and the output interface taken.
pub type Hop = (u64, u32);
pub type Path = Vec<Hop>;

#[derive(Debug, Default)]
pub struct PathMap {
    paths: RwLock<HashMap<(Ipv4Addr, Ipv4Addr), Path>>,
}

impl PathMap {
    pub fn new() -> Self {
        Self {
            paths: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, src: Ipv4Addr, dst: Ipv4Addr, path: Path) {
        self.paths.write().insert((src, dst), path);
    }

    /// Replaces every attributed path at once, e.g. after a topology
    /// recompute invalidates all previous attributions.
    pub fn set_all(&self, paths: HashMap<(Ipv4Addr, Ipv4Addr), Path>) {
        *self.paths.write() = paths;
    }

    pub fn get(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Option<Path> {
        self.paths.read().get(&(src, dst)).cloned()
    }

    pub fn switch_count(&self, src: Ipv4Addr, dst: Ipv4Addr) -> usize {
        self.paths
            .read()
            .get(&(src, dst))
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.paths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips_a_path() {
        let map = PathMap::new();
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        map.set(src, dst, vec![(1, 2), (3, 4)]);
        assert_eq!(map.get(src, dst), Some(vec![(1, 2), (3, 4)]));
        assert_eq!(map.switch_count(src, dst), 2);
    }

    #[test]
    fn unknown_pair_returns_none() {
        let map = PathMap::new();
        assert_eq!(map.get(Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2)), None);
    }
}
