//! Daemon configuration: JSON on disk, env-overridable path, saved back
//! with a temp-file-then-rename so a crash mid-write never truncates it.

use std::path::Path;

use ndtwin_common::{NdtResult, FLOW_IDLE_TIMEOUT_MS, SFLOW_PORT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NdtConfig {
    /// Static topology file the graph is loaded from (and name edits are
    /// persisted back to).
    pub topology_file: String,
    /// Simulated (software bridges) vs testbed (physical switches).
    pub simulated_mode: bool,

    pub sflow_bind_addr: String,
    pub sflow_port: u16,

    pub flow_idle_timeout_ms: u64,
    pub pure_ack_max_bytes: u32,

    /// Cadence of the classifier-driven path attribution loop.
    pub path_query_tick_ms: u64,

    pub status_poll_secs: u64,
    pub flow_table_poll_secs: u64,
    pub ping_retries: u32,
    pub ping_spacing_secs: u64,
    pub ping_timeout_secs: u64,

    pub dispatcher_burst_size: usize,
    pub dispatcher_fence_per_burst: bool,
}

impl Default for NdtConfig {
    fn default() -> Self {
        Self {
            topology_file: "/etc/ndtwin/topology.json".into(),
            simulated_mode: true,
            sflow_bind_addr: "0.0.0.0".into(),
            sflow_port: SFLOW_PORT,
            flow_idle_timeout_ms: FLOW_IDLE_TIMEOUT_MS,
            pure_ack_max_bytes: 80,
            path_query_tick_ms: 1,
            status_poll_secs: 10,
            flow_table_poll_secs: 10,
            ping_retries: 3,
            ping_spacing_secs: 1,
            ping_timeout_secs: 5,
            dispatcher_burst_size: 2000,
            dispatcher_fence_per_burst: false,
        }
    }
}

impl NdtConfig {
    pub fn load(path: impl AsRef<Path>) -> NdtResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> NdtResult<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
