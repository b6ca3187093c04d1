//! Flow-rule jobs and the JSON batch document they arrive in.

use ndtwin_common::{NdtError, NdtResult};
use serde_json::Value;
use tracing::warn;

/// What a job does to the target switch's flow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOp {
    Install,
    Modify,
    Delete,
}

/// One flow-rule mutation bound for a specific datapath. The `match` and
/// `actions` documents are carried opaquely (the southbound sender
/// renders them for the controller API), but `ipv4_dst` is parsed once
/// into `dst_ip_u32` here so nothing downstream re-parses the address.
#[derive(Debug, Clone)]
pub struct FlowJob {
    pub dpid: u64,
    pub op: FlowOp,
    pub priority: u16,
    pub match_fields: Value,
    pub actions: Value,
    pub dst_ip_u32: u32,
    pub idle_timeout: Option<u32>,
    pub corr_id: u64,
}

/// Parses a flow-rule batch document into jobs, in document order:
/// installs, then modifies, then deletes. Entries missing the required
/// `ipv4_dst` are dropped with a warning; a document with none of the
/// three arrays is a bad request.
pub fn parse_batch(doc: &Value, corr_id: u64) -> NdtResult<Vec<FlowJob>> {
    let sections = [
        ("install_flow_entries", FlowOp::Install),
        ("modify_flow_entries", FlowOp::Modify),
        ("delete_flow_entries", FlowOp::Delete),
    ];

    if sections.iter().all(|(name, _)| doc.get(name).is_none()) {
        return Err(NdtError::Parse(
            "flow-rule batch has none of install/modify/delete_flow_entries".into(),
        ));
    }

    let mut jobs = Vec::new();
    for (name, op) in sections {
        let Some(list) = doc.get(name).and_then(Value::as_array) else {
            continue;
        };
        for entry in list {
            match parse_entry(entry, op, corr_id) {
                Some(job) => jobs.push(job),
                None => warn!(section = name, "dropping flow entry without a valid ipv4_dst"),
            }
        }
    }
    Ok(jobs)
}

fn parse_entry(entry: &Value, op: FlowOp, corr_id: u64) -> Option<FlowJob> {
    let match_fields = entry.get("match").cloned().unwrap_or(Value::Null);
    let dst_ip: std::net::Ipv4Addr = match_fields
        .get("ipv4_dst")?
        .as_str()?
        .split('/')
        .next()?
        .parse()
        .ok()?;

    Some(FlowJob {
        dpid: entry.get("dpid").and_then(Value::as_u64).unwrap_or(0),
        op,
        priority: entry.get("priority").and_then(Value::as_u64).unwrap_or(0) as u16,
        match_fields,
        actions: entry.get("actions").cloned().unwrap_or(Value::Null),
        dst_ip_u32: u32::from(dst_ip),
        idle_timeout: entry
            .get("idle_timeout")
            .and_then(Value::as_u64)
            .map(|t| t as u32),
        corr_id,
    })
}
