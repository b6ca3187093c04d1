//! The classifier itself: per-`(dpid, tableId)` subtable sets, rebuilt
//! incrementally from polled flow tables and consulted by lookup.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::parse::parse_poll;
use crate::rule::{CanonicalKey, Effect};
use crate::subtable::Subtable;

/// The classifier owns its state directly; moving the value transfers
/// every subtable with it.
pub struct Classifier {
    tables: RwLock<HashMap<(u64, u8), Vec<Subtable>>>,
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Incremental mark-and-sweep: a poll reports the complete flow table
    /// for every switch object it contains, so replacing the state of
    /// each observed `(dpid, tableId)` pair with the freshly parsed
    /// subtables has the same observable effect as marking-then-sweeping
    /// rule-by-rule: any rule absent from this poll is simply not
    /// reinserted. `(dpid, tableId)` pairs absent from this poll (e.g. an
    /// unreachable switch) are left untouched.
    pub fn update_from_queried_tables(&self, new_tables: &Value) {
        let parsed = parse_poll(new_tables);

        let mut grouped: HashMap<(u64, u8), Vec<(CanonicalKey, crate::rule::Rule)>> =
            HashMap::new();
        for entry in parsed {
            grouped
                .entry((entry.dpid, entry.table_id))
                .or_default()
                .push((entry.rule.mask, entry.rule));
        }

        let mut tables = self.tables.write();
        for (key, rules) in grouped {
            let mut subtables: HashMap<CanonicalKey, Subtable> = HashMap::new();
            for (mask, rule) in rules {
                subtables
                    .entry(mask)
                    .or_insert_with(|| Subtable::new(mask))
                    .insert(rule);
            }
            tables.insert(key, subtables.into_values().collect());
        }
    }

    /// Highest-priority matching rule's effect for `(dpid, tableId)`, or
    /// `None` if no rule matches or the dpid is unknown. Tie-breaking
    /// among equal-priority matches is unspecified.
    pub fn lookup(&self, dpid: u64, key: &CanonicalKey, table_id: u8) -> Option<Effect> {
        let tables = self.tables.read();
        let subtables = tables.get(&(dpid, table_id))?;

        subtables
            .iter()
            .flat_map(|s| s.candidates(key))
            .max_by_key(|r| r.priority)
            .map(|r| r.effect.clone())
    }

    pub fn rule_count(&self, dpid: u64) -> usize {
        self.tables
            .read()
            .iter()
            .filter(|((d, _), _)| *d == dpid)
            .map(|(_, subtables)| subtables.iter().map(Subtable::rule_count).sum::<usize>())
            .sum()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key_for(ipv4_dst: u32) -> CanonicalKey {
        CanonicalKey {
            eth_type: 0x0800,
            ipv4_dst,
            ..CanonicalKey::default()
        }
    }

    #[test]
    fn s2_incremental_update_removes_unobserved_rule() {
        let classifier = Classifier::new();
        let poll1 = json!([{"dpid": 1, "flows": [
            {"priority": 10, "match": {"eth_type": 2048, "ipv4_dst": "10.0.0.0/24"}, "actions": ["OUTPUT:2"]}
        ]}]);
        classifier.update_from_queried_tables(&poll1);

        let key = key_for(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 7)));
        let effect = classifier.lookup(1, &key, 0).expect("expected a match");
        assert_eq!(effect.output_ports, vec![2]);

        let poll2 = json!([{"dpid": 1, "flows": []}]);
        classifier.update_from_queried_tables(&poll2);
        assert!(classifier.lookup(1, &key, 0).is_none());
    }

    #[test]
    fn dpid_indexed_poll_shape_is_visible_to_table_zero_lookups() {
        let classifier = Classifier::new();
        let poll = json!([{"dpid": 1, "flows": {"1": [
            {"priority": 10, "match": {"eth_type": 2048, "ipv4_dst": "10.0.0.0/24"}, "actions": ["OUTPUT:2"]}
        ]}}]);
        classifier.update_from_queried_tables(&poll);

        let key = key_for(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 7)));
        let effect = classifier.lookup(1, &key, 0).expect("expected a match");
        assert_eq!(effect.output_ports, vec![2]);
    }

    #[test]
    fn lookup_on_unknown_dpid_returns_none() {
        let classifier = Classifier::new();
        assert!(classifier.lookup(99, &CanonicalKey::default(), 0).is_none());
    }

    #[test]
    fn slash_zero_mask_matches_every_key_at_its_priority() {
        let classifier = Classifier::new();
        let poll = json!([{"dpid": 1, "flows": [
            {"priority": 1, "match": {"ipv4_dst": "0.0.0.0/0"}, "actions": ["OUTPUT:9"]}
        ]}]);
        classifier.update_from_queried_tables(&poll);

        for ip in [0x0a000001u32, 0xffffffffu32, 0u32] {
            let key = CanonicalKey {
                ipv4_dst: ip,
                ..CanonicalKey::default()
            };
            assert_eq!(
                classifier.lookup(1, &key, 0).unwrap().output_ports,
                vec![9]
            );
        }
    }

    #[test]
    fn highest_priority_match_wins() {
        let classifier = Classifier::new();
        let poll = json!([{"dpid": 1, "flows": [
            {"priority": 10, "match": {"ipv4_dst": "10.0.0.0/24"}, "actions": ["OUTPUT:1"]},
            {"priority": 20, "match": {"ipv4_dst": "10.0.0.7"}, "actions": ["OUTPUT:2"]}
        ]}]);
        classifier.update_from_queried_tables(&poll);

        let key = key_for(u32::from(std::net::Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(classifier.lookup(1, &key, 0).unwrap().output_ports, vec![2]);
    }
}
