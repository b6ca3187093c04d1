//! Shared types, error taxonomy and constants for the NDT control plane.
//!
//! This crate carries the identity types (`FlowKey`, `AgentKey`), the
//! error enum threaded through every other `ndtwin-*` crate, the protocol
//! and tuning constants from the static-topology / sFlow wire format, and
//! small lock-free primitives (`Timestamp`, `AtomicCounter`) used by the
//! rate estimators and pollers.

pub mod error;
pub mod flow;
pub mod ip;

pub use error::{NdtError, NdtResult};
pub use flow::{AgentKey, FlowKey};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// UDP port the sFlow collector listens on.
pub const SFLOW_PORT: u16 = 6343;
/// Receive buffer size for a single sFlow datagram.
pub const BUFFER_SIZE: usize = 65535;
/// A FlowKey absent from the collector table for longer than this is purged.
pub const FLOW_IDLE_TIMEOUT_MS: u64 = 15_000;
/// Width of the immediate-rate sliding window.
pub const TIME_UNIT_INTERVAL_MS: u64 = 1_000;
/// Rate at or above which a flow is considered an elephant flow.
pub const MICE_FLOW_UNDER_THRESHOLD_BPS: u64 = 10_000_000;
/// Residual bandwidth below which a link is considered saturated.
pub const EMPTY_LINK_THRESHOLD_BPS: u64 = 700_000_000;
/// Default interface speed assumed for simulated (Mininet) links.
pub const MININET_INTERFACE_SPEED_BPS: u64 = 1_000_000_000;
/// TTL for entries in an edge's `flowSet`.
pub const EDGE_FLOW_TTL_MS: u64 = 2_000;

/// Wall-clock timestamp in milliseconds since the Unix epoch.
///
/// A thin newtype rather than a raw `u64` so call sites read as
/// "a point in time" rather than "some integer"; arithmetic against
/// `Duration`-derived millisecond counts is still just subtraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Current wall-clock time, truncated to milliseconds.
    #[inline]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as u64;
        Self(millis)
    }

    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since this timestamp, saturating at zero for
    /// timestamps in the future (clock skew across async tasks).
    #[inline]
    pub fn elapsed_ms(&self) -> u64 {
        Self::now().0.saturating_sub(self.0)
    }
}

/// Lock-free counter used by the poller caches and dispatcher stats.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    #[inline]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }
}
