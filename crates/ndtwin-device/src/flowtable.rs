//! Flow-table batch application and the added/removed/modified diff
//! computed between successive polls of a switch's OpenFlow table.

use std::collections::HashMap;

use ndtwin_common::NdtResult;
use parking_lot::RwLock;
use serde_json::Value;

/// One cached flow-table entry, keyed by `(priority, eth_type, ipv4_dst)`
/// the same way `updateOpenFlowTables` identifies entries across polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEntry {
    pub priority: u16,
    pub eth_type: u16,
    pub ipv4_dst: u32,
    pub out_port: u32,
}

impl FlowEntry {
    fn key(&self) -> (u16, u16, u32) {
        (self.priority, self.eth_type, self.ipv4_dst)
    }
}

#[derive(Debug, Default)]
pub struct FlowTableBatch {
    pub install: Vec<FlowEntry>,
    pub modify: Vec<FlowEntry>,
    pub delete: Vec<FlowEntry>,
}

/// Parses a batch document's three named arrays into per-dpid patches.
/// `ipv4_dst` is required on every entry and is parsed to host-order
/// `u32`; entries missing it are dropped rather than failing the batch.
pub fn parse_batch(doc: &Value) -> HashMap<u64, FlowTableBatch> {
    let mut batches: HashMap<u64, FlowTableBatch> = HashMap::new();
    let sections: [(&str, fn(&mut FlowTableBatch) -> &mut Vec<FlowEntry>); 3] = [
        ("install_flow_entries", |b| &mut b.install),
        ("modify_flow_entries", |b| &mut b.modify),
        ("delete_flow_entries", |b| &mut b.delete),
    ];
    for (name, section) in sections {
        let Some(list) = doc.get(name).and_then(Value::as_array) else {
            continue;
        };
        for entry in list {
            let Some((dpid, parsed)) = parse_entry(entry) else {
                continue;
            };
            section(batches.entry(dpid).or_default()).push(parsed);
        }
    }
    batches
}

fn parse_entry(entry: &Value) -> Option<(u64, FlowEntry)> {
    let matched = entry.get("match")?;
    let ipv4_dst: std::net::Ipv4Addr = matched
        .get("ipv4_dst")?
        .as_str()?
        .split('/')
        .next()?
        .parse()
        .ok()?;
    let out_port = entry
        .get("actions")
        .and_then(Value::as_array)
        .and_then(|actions| {
            actions
                .iter()
                .find_map(|a| a.as_str()?.strip_prefix("OUTPUT:")?.parse::<u32>().ok())
        })
        .unwrap_or(0);
    let dpid = entry.get("dpid").and_then(Value::as_u64).unwrap_or(0);
    Some((
        dpid,
        FlowEntry {
            priority: entry.get("priority").and_then(Value::as_u64).unwrap_or(0) as u16,
            eth_type: matched.get("eth_type").and_then(Value::as_u64).unwrap_or(0x0800) as u16,
            ipv4_dst: u32::from(ipv4_dst),
            out_port,
        },
    ))
}

/// Parses one switch's polled flow-table document (the same shape
/// `as_poll_document` produces) back into cache entries. Flows without a
/// parseable `ipv4_dst` are skipped.
pub fn parse_table(doc: &Value) -> Vec<FlowEntry> {
    let Some(flows) = doc.get("flows").and_then(Value::as_array) else {
        return Vec::new();
    };
    flows
        .iter()
        .filter_map(|flow| {
            let matched = flow.get("match")?;
            let ipv4_dst: std::net::Ipv4Addr = matched
                .get("ipv4_dst")?
                .as_str()?
                .split('/')
                .next()?
                .parse()
                .ok()?;
            let out_port = flow
                .get("actions")
                .and_then(Value::as_array)
                .and_then(|actions| {
                    actions.iter().find_map(|a| {
                        a.as_str()?.strip_prefix("OUTPUT:")?.parse::<u32>().ok()
                    })
                })
                .unwrap_or(0);
            Some(FlowEntry {
                priority: flow.get("priority").and_then(Value::as_u64).unwrap_or(0) as u16,
                eth_type: matched.get("eth_type").and_then(Value::as_u64).unwrap_or(0x0800) as u16,
                ipv4_dst: u32::from(ipv4_dst),
                out_port,
            })
        })
        .collect()
}

/// The per-dpid flow-table cache: best-effort in-memory patching from
/// batches, read back whole by the classifier's poll consumer.
#[derive(Debug, Default)]
pub struct FlowTableCache {
    tables: RwLock<HashMap<u64, Vec<FlowEntry>>>,
}

impl FlowTableCache {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Applies a parsed batch to `dpid`'s table: installs append, modifies
    /// replace by `(priority, eth_type, ipv4_dst)`, deletes remove by the
    /// same key. Unmatched modify/delete entries are simply no-ops;
    /// this is a best-effort patch, not a transactional apply.
    pub fn apply_batch(&self, dpid: u64, batch: &FlowTableBatch) {
        let mut tables = self.tables.write();
        let table = tables.entry(dpid).or_default();

        for entry in &batch.install {
            table.push(*entry);
        }
        for entry in &batch.modify {
            if let Some(existing) = table.iter_mut().find(|e| e.key() == entry.key()) {
                *existing = *entry;
            }
        }
        for entry in &batch.delete {
            table.retain(|e| e.key() != entry.key());
        }
    }

    pub fn table_for(&self, dpid: u64) -> Vec<FlowEntry> {
        self.tables.read().get(&dpid).cloned().unwrap_or_default()
    }

    /// Replaces the cached table for `dpid` wholesale, used by the
    /// flow-table poll task after fetching the switch's full table.
    pub fn set_table(&self, dpid: u64, entries: Vec<FlowEntry>) {
        self.tables.write().insert(dpid, entries);
    }

    pub fn as_poll_document(&self) -> NdtResult<Value> {
        let tables = self.tables.read();
        let switches: Vec<Value> = tables
            .iter()
            .map(|(dpid, entries)| {
                let flows: Vec<Value> = entries
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "priority": e.priority,
                            "match": {
                                "eth_type": e.eth_type,
                                "ipv4_dst": std::net::Ipv4Addr::from(e.ipv4_dst).to_string(),
                            },
                            "actions": [format!("OUTPUT:{}", e.out_port)],
                        })
                    })
                    .collect();
                serde_json::json!({ "dpid": dpid, "flows": flows })
            })
            .collect();
        Ok(Value::Array(switches))
    }
}

/// One changed entry in a flow-table diff: `dst_ip` identifies the
/// route, `old_out_port`/`new_out_port` are `0` when the entry was added
/// or removed respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowChange {
    pub dst_ip: u32,
    pub old_out_port: u32,
    pub new_out_port: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FlowDiff {
    pub dpid: u64,
    pub added: Vec<FlowChange>,
    pub removed: Vec<FlowChange>,
    pub modified: Vec<FlowChange>,
}

/// Compares a prior table snapshot (`dst_ip -> out_port`, keyed per
/// dpid) against a freshly polled one and reports what changed,
/// including dpids entirely absent from the new poll, whose every route
/// is reported removed.
pub fn get_flow_table_diff(
    old_table: &HashMap<u64, HashMap<u32, u32>>,
    new_table: &HashMap<u64, HashMap<u32, u32>>,
) -> Vec<FlowDiff> {
    let mut diffs = Vec::new();

    for (&dpid, old_routes) in old_table {
        let mut diff = FlowDiff { dpid, ..Default::default() };
        match new_table.get(&dpid) {
            None => {
                for (&dst_ip, &old_port) in old_routes {
                    diff.removed.push(FlowChange { dst_ip, old_out_port: old_port, new_out_port: 0 });
                }
            }
            Some(new_routes) => {
                for (&dst_ip, &old_port) in old_routes {
                    match new_routes.get(&dst_ip) {
                        None => diff.removed.push(FlowChange { dst_ip, old_out_port: old_port, new_out_port: 0 }),
                        Some(&new_port) if new_port != old_port => {
                            diff.modified.push(FlowChange { dst_ip, old_out_port: old_port, new_out_port: new_port })
                        }
                        _ => {}
                    }
                }
                for (&dst_ip, &new_port) in new_routes {
                    if !old_routes.contains_key(&dst_ip) {
                        diff.added.push(FlowChange { dst_ip, old_out_port: 0, new_out_port: new_port });
                    }
                }
            }
        }
        if !diff.added.is_empty() || !diff.removed.is_empty() || !diff.modified.is_empty() {
            diffs.push(diff);
        }
    }

    for (&dpid, new_routes) in new_table {
        if !old_table.contains_key(&dpid) {
            let added = new_routes
                .iter()
                .map(|(&dst_ip, &new_port)| FlowChange { dst_ip, old_out_port: 0, new_out_port: new_port })
                .collect();
            diffs.push(FlowDiff { dpid, added, removed: Vec::new(), modified: Vec::new() });
        }
    }

    diffs
}
