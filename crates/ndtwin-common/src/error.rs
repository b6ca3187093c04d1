//! Error taxonomy for the NDT control plane

use thiserror::Error;

/// Aggregate error type shared across ndtwin crates
#[derive(Error, Debug)]
pub enum NdtError {
    /// Lookup failed (unknown dpid/ip/mac/name). Never raised on the hot
    /// data path; callers there get `None` instead.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or incomplete JSON input (topology file, classifier poll,
    /// flow-rule batch).
    #[error("parse error: {0}")]
    Parse(String),

    /// A required field was absent from an otherwise well-formed document.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// An enum-like string field did not match any known variant.
    #[error("unknown value for {field}: {value}")]
    UnknownValue { field: &'static str, value: String },

    /// Best-effort external I/O (SNMP/SSH/smart-plug/HTTP) failed; caller
    /// should retain the previous cached value and retry on the next tick.
    #[error("external I/O failed: {0}")]
    ExternalIo(String),

    /// The on-disk topology file and in-memory graph disagree after a
    /// persisted mutation.
    #[error("topology file out of sync: {0}")]
    ConfigDrift(String),

    /// Fatal startup failure (e.g. UDP bind). Prevents the process from
    /// claiming readiness.
    #[error("fatal startup failure: {0}")]
    Fatal(String),

    /// IO error, e.g. reading/writing the topology file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type used throughout the NDT control plane
pub type NdtResult<T> = Result<T, NdtError>;
