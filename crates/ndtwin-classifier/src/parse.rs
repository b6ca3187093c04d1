//! JSON parsing for the classifier's poll input: both document shapes,
//! OpenFlow 1.0/1.3 field-name variants, and the four IPv4 netmask
//! notations.

use serde_json::Value;
use tracing::warn;

use crate::rule::{CanonicalKey, Effect, Mask, Rule};

/// One parsed rule plus the `(dpid, tableId)` it belongs to.
pub struct ParsedEntry {
    pub dpid: u64,
    pub table_id: u8,
    pub rule: Rule,
}

/// Parses a full poll document (either document shape) into the set of
/// rules observed this poll, dropping malformed entries with a logged
/// warning rather than failing the whole poll.
pub fn parse_poll(doc: &Value) -> Vec<ParsedEntry> {
    let mut out = Vec::new();
    let Some(switches) = doc.as_array() else {
        warn!("classifier poll input is not a JSON array; ignoring");
        return out;
    };

    for switch in switches {
        let Some(dpid) = switch.get("dpid").and_then(Value::as_u64) else {
            warn!("classifier poll entry missing dpid; skipping switch");
            continue;
        };
        let Some(flows) = switch.get("flows") else {
            continue;
        };

        match flows {
            // Shape A: flat list, implicitly table 0.
            Value::Array(list) => {
                for flow in list {
                    if let Some(rule) = parse_flow(flow) {
                        out.push(ParsedEntry {
                            dpid,
                            table_id: 0,
                            rule,
                        });
                    }
                }
            }
            // Shape B: the map is indexed by dpid, one entry per
            // switch. Flows land in table 0 exactly as the flat shape's
            // do; the key names the switch, not an OpenFlow table.
            Value::Object(map) => {
                for (dpid_str, list) in map {
                    let Ok(map_dpid) = dpid_str.parse::<u64>() else {
                        warn!(dpid = %dpid_str, "non-numeric dpid key; skipping");
                        continue;
                    };
                    let Some(list) = list.as_array() else { continue };
                    for flow in list {
                        if let Some(rule) = parse_flow(flow) {
                            out.push(ParsedEntry {
                                dpid: map_dpid,
                                table_id: 0,
                                rule,
                            });
                        }
                    }
                }
            }
            _ => warn!(dpid, "unrecognised `flows` shape; skipping switch"),
        }
    }

    out
}

fn parse_flow(flow: &Value) -> Option<Rule> {
    let priority = flow.get("priority").and_then(Value::as_u64).unwrap_or(0) as u16;
    let matched = flow.get("match")?;
    let (mask, value) = parse_match(matched)?;
    let actions = flow
        .get("actions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut effect = parse_actions(&actions);
    effect.goto_table = flow.get("goto_table").and_then(Value::as_u64).map(|t| t as u8);

    Some(Rule {
        priority,
        mask,
        masked_value: value.masked(&mask),
        effect,
    })
}

/// Parses a `match` object into `(mask, exact-value)`. Returns `None` and
/// logs a warning if any field is unrecognised or malformed; the whole
/// rule is dropped rather than partially applied.
fn parse_match(m: &Value) -> Option<(Mask, CanonicalKey)> {
    let Some(obj) = m.as_object() else {
        warn!("classifier match is not a JSON object; dropping rule");
        return None;
    };

    let mut mask = Mask::none();
    let mut value = CanonicalKey::default();

    for (field, raw) in obj {
        match field.as_str() {
            "in_port" => {
                value.in_port = as_u32(raw)?;
                mask.in_port = u32::MAX;
            }
            "dl_type" | "eth_type" => {
                value.eth_type = as_u16(raw)?;
                mask.eth_type = u16::MAX;
            }
            "nw_proto" | "ip_proto" => {
                value.ip_proto = as_u8(raw)?;
                mask.ip_proto = u8::MAX;
            }
            "nw_dst" | "ipv4_dst" => {
                let (v, m) = parse_netmask(raw.as_str()?)?;
                value.ipv4_dst = v;
                mask.ipv4_dst = m;
            }
            "nw_src" | "ipv4_src" => {
                let (v, m) = parse_netmask(raw.as_str()?)?;
                value.ipv4_src = v;
                mask.ipv4_src = m;
            }
            "tp_src" | "tcp_src" | "udp_src" => {
                value.tp_src = as_u16(raw)?;
                mask.tp_src = u16::MAX;
            }
            "tp_dst" | "tcp_dst" | "udp_dst" => {
                value.tp_dst = as_u16(raw)?;
                mask.tp_dst = u16::MAX;
            }
            "vlan_tci" => {
                value.vlan_tci = as_u16(raw)?;
                mask.vlan_tci = u16::MAX;
            }
            "metadata" => {
                value.metadata = as_u64(raw)?;
                mask.metadata = u64::MAX;
            }
            other => {
                warn!(field = other, "unknown classifier match field; dropping rule");
                return None;
            }
        }
    }

    Some((mask, value))
}

/// Parses one of the four supported IPv4 netmask notations into
/// `(value, mask)`, both host byte order.
fn parse_netmask(s: &str) -> Option<(u32, u32)> {
    let (addr, netmask) = match s.split_once('/') {
        Some((a, m)) => (a, Some(m)),
        None => (s, None),
    };
    let value: std::net::Ipv4Addr = addr.parse().ok()?;
    let value = u32::from(value);

    let mask = match netmask {
        None => u32::MAX,
        Some(m) if m.starts_with("0x") || m.starts_with("0X") => {
            u32::from_str_radix(&m[2..], 16).ok()?
        }
        Some(m) if m.contains('.') => u32::from(m.parse::<std::net::Ipv4Addr>().ok()?),
        Some(m) => {
            let prefix: u32 = m.parse().ok()?;
            if prefix > 32 {
                return None;
            }
            if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            }
        }
    };

    Some((value & mask, mask))
}

/// Parses `"OUTPUT:<port>"` / `"GROUP:<id>"` action strings.
fn parse_actions(actions: &[Value]) -> Effect {
    let mut effect = Effect::default();
    for action in actions {
        let Some(s) = action.as_str() else { continue };
        if let Some(port) = s.strip_prefix("OUTPUT:") {
            if let Ok(p) = port.parse() {
                effect.output_ports.push(p);
            }
        } else if let Some(group) = s.strip_prefix("GROUP:") {
            if let Ok(g) = group.parse() {
                effect.group_id = Some(g);
            }
        }
    }
    effect
}

fn as_u8(v: &Value) -> Option<u8> {
    v.as_u64().map(|n| n as u8)
}

fn as_u16(v: &Value) -> Option<u16> {
    v.as_u64().map(|n| n as u16)
}

fn as_u32(v: &Value) -> Option<u32> {
    v.as_u64().map(|n| n as u32)
}

fn as_u64(v: &Value) -> Option<u64> {
    v.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_both_document_shapes() {
        let shape_a = json!([{"dpid": 1, "flows": [
            {"priority": 10, "match": {"eth_type": 2048, "ipv4_dst": "10.0.0.0/24"}, "actions": ["OUTPUT:2"]}
        ]}]);
        let shape_b = json!([{"dpid": 1, "flows": {"1": [
            {"priority": 10, "match": {"eth_type": 2048, "ipv4_dst": "10.0.0.0/24"}, "actions": ["OUTPUT:2"]}
        ]}}]);

        let a = parse_poll(&shape_a);
        let b = parse_poll(&shape_b);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        // Both shapes file the same rule under the same switch and table.
        assert_eq!((a[0].dpid, a[0].table_id), (b[0].dpid, b[0].table_id));
        assert_eq!(b[0].table_id, 0);
    }

    #[test]
    fn dpid_indexed_shape_keys_rules_by_the_map_dpid() {
        let doc = json!([{"dpid": 1, "flows": {"7": [
            {"priority": 10, "match": {"ipv4_dst": "10.0.0.5"}, "actions": ["OUTPUT:2"]}
        ]}}]);
        let parsed = parse_poll(&doc);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].dpid, 7);
        assert_eq!(parsed[0].table_id, 0);
    }

    #[test]
    fn accepts_of10_and_of13_field_names() {
        let of10 = json!([{"dpid": 1, "flows": [
            {"priority": 5, "match": {"dl_type": 2048, "nw_dst": "10.0.0.7", "nw_proto": 6, "tp_dst": 80}, "actions": ["OUTPUT:1"]}
        ]}]);
        let of13 = json!([{"dpid": 1, "flows": [
            {"priority": 5, "match": {"eth_type": 2048, "ipv4_dst": "10.0.0.7", "ip_proto": 6, "tcp_dst": 80}, "actions": ["OUTPUT:1"]}
        ]}]);

        let a = parse_poll(&of10);
        let b = parse_poll(&of13);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].rule.masked_value.ipv4_dst, b[0].rule.masked_value.ipv4_dst);
    }

    #[test]
    fn drops_rule_on_unknown_field() {
        let doc = json!([{"dpid": 1, "flows": [
            {"priority": 5, "match": {"made_up_field": 1}, "actions": []}
        ]}]);
        assert_eq!(parse_poll(&doc).len(), 0);
    }

    #[test]
    fn drops_rule_on_malformed_netmask() {
        let doc = json!([{"dpid": 1, "flows": [
            {"priority": 5, "match": {"ipv4_dst": "not-an-ip/bogus"}, "actions": []}
        ]}]);
        assert_eq!(parse_poll(&doc).len(), 0);
    }

    #[test]
    fn cidr_dotted_hex_and_implicit_masks_agree() {
        let (v1, m1) = parse_netmask("10.0.0.0/24").unwrap();
        let (v2, m2) = parse_netmask("10.0.0.0/255.255.255.0").unwrap();
        let (v3, m3) = parse_netmask("10.0.0.0/0xffffff00").unwrap();
        assert_eq!((v1, m1), (v2, m2));
        assert_eq!((v2, m2), (v3, m3));

        let (v4, m4) = parse_netmask("10.0.0.7").unwrap();
        assert_eq!(m4, u32::MAX);
        assert_eq!(v4, u32::from(std::net::Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn slash_zero_wildcards_entire_address() {
        let (v, m) = parse_netmask("10.0.0.0/0").unwrap();
        assert_eq!(m, 0);
        assert_eq!(v, 0);
    }
}
