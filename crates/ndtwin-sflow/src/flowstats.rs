//! Per-flow and per-agent accounting: the sliding-window sample queue,
//! the stats a single agent reports for a flow, and the aggregate view
//! across every agent that has seen it.

use std::collections::{HashMap, VecDeque};

use ndtwin_common::flow::{AgentKey, FlowKey};
use ndtwin_common::{Timestamp, TIME_UNIT_INTERVAL_MS};

/// One observed packet, timestamped for window eviction.
#[derive(Debug, Clone, Copy)]
struct ExtractedSample {
    frame_length: u32,
    timestamp: Timestamp,
}

/// A sliding window over recent samples: `push` admits a sample and
/// evicts everything older than `interval_ms`; `get_sum` evicts first,
/// then reports the sum of what remains. Both entry points prune, so a
/// queue that is never pushed to again still drains to zero.
#[derive(Debug, Clone)]
pub struct AutoRefreshQueue {
    interval_ms: u64,
    samples: VecDeque<ExtractedSample>,
    sum: u64,
}

impl AutoRefreshQueue {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            samples: VecDeque::new(),
            sum: 0,
        }
    }

    pub fn push(&mut self, frame_length: u32, now: Timestamp) {
        self.samples.push_back(ExtractedSample {
            frame_length,
            timestamp: now,
        });
        self.sum += frame_length as u64;
        self.refresh(now);
    }

    pub fn get_sum(&mut self, now: Timestamp) -> u64 {
        self.refresh(now);
        self.sum
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn refresh(&mut self, now: Timestamp) {
        while let Some(front) = self.samples.front() {
            if now.as_millis().saturating_sub(front.timestamp.as_millis()) > self.interval_ms {
                self.sum -= front.frame_length as u64;
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for AutoRefreshQueue {
    fn default() -> Self {
        Self::new(TIME_UNIT_INTERVAL_MS)
    }
}

/// What a single agent has reported for one flow: raw counters this
/// period and last, plus the derived rates and the window used to
/// compute the immediate-cadence rate.
#[derive(Debug, Clone)]
pub struct FlowStats {
    pub ingress_byte_count_current: u64,
    pub egress_byte_count_current: u64,
    pub ingress_byte_count_previous: u64,
    pub egress_byte_count_previous: u64,
    pub ingress_packet_count_current: u64,
    pub egress_packet_count_current: u64,
    pub ingress_packet_count_previous: u64,
    pub egress_packet_count_previous: u64,
    pub avg_byte_rate_bps: f64,
    pub avg_packet_rate: f64,
    pub sampling_rate: u32,
    pub packet_queue: AutoRefreshQueue,
}

impl FlowStats {
    pub fn new(sampling_rate: u32) -> Self {
        Self {
            ingress_byte_count_current: 0,
            egress_byte_count_current: 0,
            ingress_byte_count_previous: 0,
            egress_byte_count_previous: 0,
            ingress_packet_count_current: 0,
            egress_packet_count_current: 0,
            ingress_packet_count_previous: 0,
            egress_packet_count_previous: 0,
            avg_byte_rate_bps: 0.0,
            avg_packet_rate: 0.0,
            sampling_rate: sampling_rate.max(1),
            packet_queue: AutoRefreshQueue::new(TIME_UNIT_INTERVAL_MS),
        }
    }

    /// Periodic (1 Hz) rate recompute: `(current - previous) * 8 *
    /// samplingRate`, then roll current into previous for next tick.
    pub fn roll_periodic(&mut self) {
        let byte_delta = self
            .ingress_byte_count_current
            .saturating_add(self.egress_byte_count_current)
            .saturating_sub(
                self.ingress_byte_count_previous
                    .saturating_add(self.egress_byte_count_previous),
            );
        let packet_delta = self
            .ingress_packet_count_current
            .saturating_add(self.egress_packet_count_current)
            .saturating_sub(
                self.ingress_packet_count_previous
                    .saturating_add(self.egress_packet_count_previous),
            );

        self.avg_byte_rate_bps = byte_delta as f64 * 8.0 * self.sampling_rate as f64;
        self.avg_packet_rate = packet_delta as f64 * self.sampling_rate as f64;

        self.ingress_byte_count_previous = self.ingress_byte_count_current;
        self.egress_byte_count_previous = self.egress_byte_count_current;
        self.ingress_packet_count_previous = self.ingress_packet_count_current;
        self.egress_packet_count_previous = self.egress_packet_count_current;
    }
}

/// The per-flow record held in the flow table: every agent's view of
/// this flow, the rates derived from aggregating across agents, and the
/// flags downstream consumers (dispatcher, topology) read.
#[derive(Debug, Clone)]
pub struct FlowInfo {
    pub agent_flow_stats: HashMap<AgentKey, FlowStats>,
    pub estimated_flow_sending_rate_periodically: f64,
    pub estimated_flow_sending_rate_immediately: f64,
    pub estimated_packet_sending_rate_periodically: f64,
    pub estimated_packet_sending_rate_immediately: f64,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub is_elephant_flow_periodically: bool,
    pub is_elephant_flow_immediately: bool,
    pub is_ack: bool,
    pub is_pure_ack: bool,
    /// Cached attribution of this flow's forwarding path, filled in by
    /// the path query loop once the classifier has resolved it.
    pub flow_path: Option<Vec<(u64, u32)>>,
}

impl FlowInfo {
    pub fn new(now: Timestamp) -> Self {
        Self {
            agent_flow_stats: HashMap::new(),
            estimated_flow_sending_rate_periodically: 0.0,
            estimated_flow_sending_rate_immediately: 0.0,
            estimated_packet_sending_rate_periodically: 0.0,
            estimated_packet_sending_rate_immediately: 0.0,
            start_time: now,
            end_time: now,
            is_elephant_flow_periodically: false,
            is_elephant_flow_immediately: false,
            is_ack: false,
            is_pure_ack: false,
            flow_path: None,
        }
    }
}

/// Per-agent interface counters, used to derive residual link capacity
/// from counter samples.
#[derive(Debug, Clone, Default)]
pub struct CounterInfo {
    pub last_report_timestamp_ms: u64,
    pub last_received_input_octets: u64,
    pub last_received_output_octets: u64,
    pub input_byte_count_on_link_times_sampling_rate: u64,
    pub output_byte_count_on_link: u64,
}

/// A key a flow table update is stored under: the identity carried by
/// every sample and every report this collector produces.
pub type FlowTableKey = FlowKey;
