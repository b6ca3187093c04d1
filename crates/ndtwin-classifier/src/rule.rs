//! Canonical key, mask and rule shapes for the OVS-style classifier.

use std::hash::{Hash, Hasher};

/// The match fields a rule can constrain, packed into a fixed field
/// order so two keys can be compared by masked equality or hashed
/// directly. Values are host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CanonicalKey {
    pub in_port: u32,
    pub eth_type: u16,
    pub ip_proto: u8,
    pub ipv4_src: u32,
    pub ipv4_dst: u32,
    pub tp_src: u16,
    pub tp_dst: u16,
    pub vlan_tci: u16,
    pub metadata: u64,
}

/// A mask has the same shape as a key: `0` wildcards a field, `!0` (or a
/// partial netmask on the IPv4 fields) constrains it.
pub type Mask = CanonicalKey;

impl CanonicalKey {
    /// Applies `mask` field-wise, returning the masked key used both to
    /// store a rule in its subtable and to probe a subtable at lookup
    /// time.
    pub fn masked(&self, mask: &Mask) -> CanonicalKey {
        CanonicalKey {
            in_port: self.in_port & mask.in_port,
            eth_type: self.eth_type & mask.eth_type,
            ip_proto: self.ip_proto & mask.ip_proto,
            ipv4_src: self.ipv4_src & mask.ipv4_src,
            ipv4_dst: self.ipv4_dst & mask.ipv4_dst,
            tp_src: self.tp_src & mask.tp_src,
            tp_dst: self.tp_dst & mask.tp_dst,
            vlan_tci: self.vlan_tci & mask.vlan_tci,
            metadata: self.metadata & mask.metadata,
        }
    }

    /// A mask with every field fully wildcard-matched (all bits set),
    /// used for fields parsed with an implicit exact match.
    pub fn all_ones() -> Self {
        CanonicalKey {
            in_port: u32::MAX,
            eth_type: u16::MAX,
            ip_proto: u8::MAX,
            ipv4_src: u32::MAX,
            ipv4_dst: u32::MAX,
            tp_src: u16::MAX,
            tp_dst: u16::MAX,
            vlan_tci: u16::MAX,
            metadata: u64::MAX,
        }
    }

    /// A mask that wildcards every field (matches anything).
    pub fn none() -> Self {
        CanonicalKey::default()
    }
}

/// Forwarding decision extracted from a rule's actions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Effect {
    pub output_ports: Vec<u32>,
    pub group_id: Option<u32>,
    pub goto_table: Option<u8>,
}

/// A single classifier rule. Identity is `(tableId, coreHash)`, computed
/// from `mask ⊕ value ⊕ priority ⊕ effect` and excluding counters/duration
/// so identity survives a poll that only refreshes byte/packet counts.
#[derive(Debug, Clone)]
pub struct Rule {
    pub priority: u16,
    pub mask: Mask,
    /// `key & mask`, i.e. the value this rule's subtable entry is stored
    /// under.
    pub masked_value: CanonicalKey,
    pub effect: Effect,
}

impl Rule {
    pub fn core_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.mask.hash(&mut hasher);
        self.masked_value.hash(&mut hasher);
        self.priority.hash(&mut hasher);
        self.effect.output_ports.hash(&mut hasher);
        self.effect.group_id.hash(&mut hasher);
        self.effect.goto_table.hash(&mut hasher);
        hasher.finish()
    }
}
