//! The sFlow collector: per-flow/per-agent accounting driven by parsed
//! wire samples, path attribution against the classifier and graph
//! store, and the periodic/immediate rate and idle-purge sweeps.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ndtwin_classifier::Classifier;
use ndtwin_common::flow::{AgentKey, FlowKey};
use ndtwin_common::{Timestamp, FLOW_IDLE_TIMEOUT_MS, MICE_FLOW_UNDER_THRESHOLD_BPS};
use ndtwin_events::{
    EventBus, FlowAddedPayload, IdleFlowPurgedPayload, NdtEvent,
};
use ndtwin_graph::GraphStore;
use parking_lot::RwLock;
use tracing::debug;

use crate::flowpath::trace_flow_path;
use crate::flowstats::{CounterInfo, FlowInfo, FlowStats};
use crate::pathmap::PathMap;
use crate::wire::{CounterSampleData, FlowSampleData, Sample};

const TCP_FLAG_ACK: u8 = 0x10;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Frame-length ceiling below which an ACK-flagged segment counts as
    /// a pure ACK. The 80-byte default is heuristic, which is why it is
    /// configuration rather than a constant.
    pub pure_ack_max_bytes: u32,
    /// A flow with no samples for this long is purged.
    pub flow_idle_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            pure_ack_max_bytes: 80,
            flow_idle_timeout_ms: FLOW_IDLE_TIMEOUT_MS,
        }
    }
}

pub struct Collector {
    flow_table: RwLock<HashMap<FlowKey, FlowInfo>>,
    counter_table: RwLock<HashMap<AgentKey, CounterInfo>>,
    path_map: PathMap,
    graph: Arc<GraphStore>,
    classifier: Arc<Classifier>,
    events: Arc<EventBus>,
    config: CollectorConfig,
}

impl Collector {
    pub fn new(
        graph: Arc<GraphStore>,
        classifier: Arc<Classifier>,
        events: Arc<EventBus>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            flow_table: RwLock::new(HashMap::new()),
            counter_table: RwLock::new(HashMap::new()),
            path_map: PathMap::new(),
            graph,
            classifier,
            events,
            config,
        }
    }

    pub fn path_map(&self) -> &PathMap {
        &self.path_map
    }

    pub fn flow_count(&self) -> usize {
        self.flow_table.read().len()
    }

    /// Parses and applies one datagram's worth of samples.
    pub fn ingest_datagram(&self, buf: &[u8], now: Timestamp) {
        let Some(header) = crate::wire::parse_header(buf) else {
            debug!("dropping non-sFlow-v5 datagram");
            return;
        };
        let samples = crate::wire::parse_samples(buf, 28, header.sample_count);
        for sample in samples {
            match sample {
                Sample::Counter(c) => self.handle_counter_sample(header.agent_ip, c, now),
                Sample::Flow(f) => self.handle_flow_sample(header.agent_ip, f, now),
            }
        }
    }

    fn handle_counter_sample(&self, agent_ip: Ipv4Addr, sample: CounterSampleData, now: Timestamp) {
        let key = AgentKey::new(agent_ip, sample.if_index);

        // Delta against the previous report for this observation point;
        // the first report only seeds the counters.
        let previous = {
            let mut table = self.counter_table.write();
            let entry = table.entry(key).or_default();
            let prev = (entry.last_report_timestamp_ms > 0).then_some((
                entry.last_report_timestamp_ms,
                entry.last_received_input_octets,
                entry.last_received_output_octets,
            ));
            entry.last_received_input_octets = sample.if_in_octets;
            entry.last_received_output_octets = sample.if_out_octets;
            entry.input_byte_count_on_link_times_sampling_rate = sample.if_in_octets;
            entry.output_byte_count_on_link = sample.if_out_octets;
            entry.last_report_timestamp_ms = now.as_millis();
            prev
        };
        let Some((last_ms, last_in, last_out)) = previous else {
            return;
        };
        let interval_ms = now.as_millis().saturating_sub(last_ms);
        if interval_ms == 0 {
            return;
        }

        let tx_bps = sample.if_out_octets.saturating_sub(last_out) * 8 * 1000 / interval_ms;
        let rx_bps = sample.if_in_octets.saturating_sub(last_in) * 8 * 1000 / interval_ms;
        let avg_bps = tx_bps.max(rx_bps);

        let Some(edge) = self.graph.find_edge_by_agent_and_port(agent_ip, sample.if_index) else {
            return;
        };
        let speed = if sample.if_speed > 0 {
            sample.if_speed
        } else {
            self.graph.with_edge(edge, |e| e.link_bandwidth)
        };
        let left = speed.saturating_sub(avg_bps);
        let utilization = if speed > 0 {
            avg_bps as f64 * 100.0 / speed as f64
        } else {
            0.0
        };
        self.graph.update_link_info(edge, left, avg_bps, utilization);
    }

    fn handle_flow_sample(&self, agent_ip: Ipv4Addr, sample: FlowSampleData, now: Timestamp) {
        let key = FlowKey::new(
            sample.src_ip,
            sample.dst_ip,
            sample.src_port,
            sample.dst_port,
            sample.protocol,
        )
        .with_icmp(sample.icmp_type, sample.icmp_code);

        let ingress = sample.input_port != 0;
        let agent_key = AgentKey::new(agent_ip, sample.input_port.max(sample.output_port));

        let is_new = {
            let mut table = self.flow_table.write();
            let is_new = !table.contains_key(&key);
            let info = table.entry(key).or_insert_with(|| FlowInfo::new(now));
            info.end_time = now;

            let stats = info
                .agent_flow_stats
                .entry(agent_key)
                .or_insert_with(|| FlowStats::new(sample.sampling_rate));
            stats.packet_queue.push(sample.frame_length, now);
            if ingress {
                stats.ingress_byte_count_current += sample.frame_length as u64;
                stats.ingress_packet_count_current += 1;
            } else {
                stats.egress_byte_count_current += sample.frame_length as u64;
                stats.egress_packet_count_current += 1;
            }

            if sample.protocol == 6 && sample.tcp_flags & TCP_FLAG_ACK != 0 {
                info.is_ack = true;
                info.is_pure_ack = sample.frame_length < self.config.pure_ack_max_bytes;
            }
            is_new
        };

        if is_new {
            self.events.emit(NdtEvent::FlowAdded(FlowAddedPayload {
                key,
                start_time_ms: now.as_millis(),
            }));
        }

        self.attribute_path(agent_ip, sample.input_port, key);
    }

    /// If the flow's endpoints are already attributed in the path map,
    /// refreshes this observation point's edge in the link-to-flow
    /// reverse index. Path discovery itself happens in the query loop,
    /// not on the sample hot path.
    fn attribute_path(&self, agent_ip: Ipv4Addr, input_port: u32, key: FlowKey) {
        if self.path_map.get(key.src_ip, key.dst_ip).is_none() {
            return;
        }
        if let Some(edge) = self.graph.find_edge_by_agent_and_port(agent_ip, input_port) {
            self.graph.touch_edge_flow(edge, key);
        }
    }

    /// One pass of the flow-path-by-query loop: for every active flow,
    /// walk the classifier's forwarding decisions from the source host's
    /// access switch and cache the resulting path on the flow and in the
    /// path map.
    pub fn run_flow_path_query_tick(&self) {
        let keys: Vec<FlowKey> = self.flow_table.read().keys().copied().collect();
        for key in keys {
            let Some(access_edge) = self.graph.find_edge_by_host_ip(key.src_ip) else {
                continue;
            };
            let start_dpid = self.graph.with_edge(access_edge, |e| {
                if e.src_ip.contains(&key.src_ip) {
                    e.dst_dpid
                } else {
                    e.src_dpid
                }
            });
            if start_dpid == 0 {
                continue;
            }
            let Some(path) =
                trace_flow_path(&self.classifier, &self.graph, start_dpid, key.src_ip, key.dst_ip)
            else {
                continue;
            };
            self.path_map.set(key.src_ip, key.dst_ip, path.clone());
            let mut table = self.flow_table.write();
            if let Some(info) = table.get_mut(&key) {
                info.flow_path = Some(path);
            }
        }
    }

    /// 1 Hz periodic rate recompute: rolls every agent's `FlowStats`,
    /// sums across agents and divides by the number of agents that
    /// actually moved bytes this period (each reporting hop sees the
    /// same traffic, so summing over hops overcounts by that factor).
    pub fn run_periodic_rate_tick(&self) {
        let mut table = self.flow_table.write();
        for info in table.values_mut() {
            let mut byte_sum = 0.0;
            let mut packet_sum = 0.0;
            let mut hops = 0u32;
            for stats in info.agent_flow_stats.values_mut() {
                stats.roll_periodic();
                if stats.avg_byte_rate_bps != 0.0 {
                    hops += 1;
                }
                byte_sum += stats.avg_byte_rate_bps;
                packet_sum += stats.avg_packet_rate;
            }
            let hops = hops.max(1) as f64;
            info.estimated_flow_sending_rate_periodically = byte_sum / hops;
            info.estimated_packet_sending_rate_periodically = packet_sum / hops;
            info.is_elephant_flow_periodically =
                info.estimated_flow_sending_rate_periodically >= MICE_FLOW_UNDER_THRESHOLD_BPS as f64;
        }
    }

    /// Immediate rate recompute (0.5-2.0s random cadence): windowed sum
    /// from each agent's `AutoRefreshQueue`, scaled by sampling rate,
    /// divided by the agents with window activity. Both immediate rates
    /// zero out when no agent reported anything inside the window.
    pub fn run_immediate_rate_tick(&self, now: Timestamp) {
        let mut table = self.flow_table.write();
        for info in table.values_mut() {
            let mut byte_sum = 0.0;
            let mut packet_sum = 0.0;
            let mut hops = 0u32;
            for stats in info.agent_flow_stats.values_mut() {
                let windowed = stats.packet_queue.get_sum(now) as f64;
                if windowed > 0.0 {
                    hops += 1;
                }
                byte_sum += windowed * stats.sampling_rate as f64 * 8.0;
                packet_sum += stats.packet_queue.len() as f64 * stats.sampling_rate as f64;
            }
            if hops == 0 {
                info.estimated_flow_sending_rate_immediately = 0.0;
                info.estimated_packet_sending_rate_immediately = 0.0;
                info.is_elephant_flow_immediately = false;
                continue;
            }
            let hops = hops as f64;
            info.estimated_flow_sending_rate_immediately = byte_sum / hops;
            info.estimated_packet_sending_rate_immediately = packet_sum / hops;
            info.is_elephant_flow_immediately =
                info.estimated_flow_sending_rate_immediately >= MICE_FLOW_UNDER_THRESHOLD_BPS as f64;
        }
    }

    /// 1 Hz idle purge: removes flows whose last activity exceeds the
    /// configured idle timeout and emits `IdleFlowPurged` for each.
    pub fn run_idle_purge_tick(&self, now: Timestamp) {
        let idle_timeout_ms = self.config.flow_idle_timeout_ms;
        let purged: Vec<FlowKey> = {
            let mut table = self.flow_table.write();
            let stale: Vec<FlowKey> = table
                .iter()
                .filter(|(_, info)| now.as_millis().saturating_sub(info.end_time.as_millis()) > idle_timeout_ms)
                .map(|(k, _)| *k)
                .collect();
            for key in &stale {
                table.remove(key);
            }
            stale
        };
        for key in purged {
            self.events.emit(NdtEvent::IdleFlowPurged(IdleFlowPurgedPayload {
                key,
                end_time_ms: now.as_millis(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndtwin_common::flow::FlowKey;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collector() -> Collector {
        Collector::new(
            Arc::new(GraphStore::new()),
            Arc::new(Classifier::new()),
            Arc::new(EventBus::new()),
            CollectorConfig::default(),
        )
    }

    fn flow_sample(src_port: u16, frame_length: u32, tcp_flags: u8) -> FlowSampleData {
        FlowSampleData {
            sampling_rate: 1,
            input_port: 3,
            output_port: 0,
            frame_length,
            protocol: 6,
            src_ip: Ipv4Addr::new(10, 0, 0, 2),
            dst_ip: Ipv4Addr::new(10, 0, 0, 3),
            src_port,
            dst_port: 80,
            icmp_type: 0,
            icmp_code: 0,
            tcp_flags,
        }
    }

    #[test]
    fn first_sample_of_a_flow_emits_flow_added() {
        let c = collector();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        c.events
            .register("FlowAdded", Arc::new(move |_| { s.fetch_add(1, Ordering::SeqCst); }));

        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 1000, 0), Timestamp::from_millis(0));
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 1000, 0), Timestamp::from_millis(10));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(c.flow_count(), 1);
    }

    #[test]
    fn ack_below_threshold_is_flagged_a_pure_ack() {
        let c = collector();
        c.handle_flow_sample(
            Ipv4Addr::new(10, 0, 0, 1),
            flow_sample(4444, 40, TCP_FLAG_ACK),
            Timestamp::from_millis(0),
        );
        let table = c.flow_table.read();
        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3), 4444, 80, 6);
        let info = table.get(&key).unwrap();
        assert!(info.is_ack);
        assert!(info.is_pure_ack);
    }

    #[test]
    fn ack_above_threshold_is_not_a_pure_ack() {
        let c = collector();
        c.handle_flow_sample(
            Ipv4Addr::new(10, 0, 0, 1),
            flow_sample(4444, 1500, TCP_FLAG_ACK),
            Timestamp::from_millis(0),
        );
        let table = c.flow_table.read();
        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3), 4444, 80, 6);
        assert!(!table.get(&key).unwrap().is_pure_ack);
    }

    #[test]
    fn idle_purge_removes_stale_flows_and_emits_once() {
        let c = collector();
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 100, 0), Timestamp::from_millis(0));
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        c.events
            .register("IdleFlowPurged", Arc::new(move |_| { s.fetch_add(1, Ordering::SeqCst); }));

        c.run_idle_purge_tick(Timestamp::from_millis(FLOW_IDLE_TIMEOUT_MS + 1));
        assert_eq!(c.flow_count(), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn periodic_rate_tick_marks_elephant_flows() {
        let c = collector();
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 2_000_000, 0), Timestamp::from_millis(0));
        c.run_periodic_rate_tick();
        let table = c.flow_table.read();
        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3), 4444, 80, 6);
        assert!(table.get(&key).unwrap().is_elephant_flow_periodically);
    }

    #[test]
    fn two_sampled_frames_at_rate_1000_estimate_sixteen_megabits() {
        let c = collector();
        let mut sample = flow_sample(4444, 1000, 0);
        sample.sampling_rate = 1000;
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), sample, Timestamp::from_millis(0));
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), sample, Timestamp::from_millis(100));
        c.run_periodic_rate_tick();

        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3), 4444, 80, 6);
        let table = c.flow_table.read();
        let info = table.get(&key).unwrap();
        assert_eq!(info.estimated_flow_sending_rate_periodically, 16_000_000.0);
        assert!(info.is_elephant_flow_periodically);
    }

    #[test]
    fn periodic_rate_divides_by_reporting_hops_not_all_agents() {
        let c = collector();
        let now = Timestamp::from_millis(0);
        // Two observation points see the flow in the first period...
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 1000, 0), now);
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 9), flow_sample(4444, 1000, 0), now);
        c.run_periodic_rate_tick();

        // ...but only one keeps reporting in the second. The silent
        // agent must not dilute the estimate.
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 1000, 0), Timestamp::from_millis(1_000));
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 1000, 0), Timestamp::from_millis(1_100));
        c.run_periodic_rate_tick();

        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3), 4444, 80, 6);
        let table = c.flow_table.read();
        let info = table.get(&key).unwrap();
        // One active hop: 2000 bytes * 8 * samplingRate(1) / 1.
        assert_eq!(info.estimated_flow_sending_rate_periodically, 16_000.0);
    }

    #[test]
    fn immediate_rates_zero_out_when_the_window_drains() {
        let c = collector();
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 50_000_000, 0), Timestamp::from_millis(0));
        c.run_immediate_rate_tick(Timestamp::from_millis(100));

        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3), 4444, 80, 6);
        {
            let table = c.flow_table.read();
            let info = table.get(&key).unwrap();
            assert!(info.estimated_flow_sending_rate_immediately > 0.0);
            assert!(info.is_elephant_flow_immediately);
        }

        // Window is 1s; two seconds later nothing remains inside it.
        c.run_immediate_rate_tick(Timestamp::from_millis(2_000));
        let table = c.flow_table.read();
        let info = table.get(&key).unwrap();
        assert_eq!(info.estimated_flow_sending_rate_immediately, 0.0);
        assert!(!info.is_elephant_flow_immediately);
    }

    fn seeded_graph() -> Arc<GraphStore> {
        use ndtwin_graph::{Edge, Vertex};
        let graph = GraphStore::new();
        let mut h1 = Vertex::new_host();
        h1.ip = vec![Ipv4Addr::new(10, 0, 0, 2)];
        let mut s1 = Vertex::new_switch(1);
        s1.ip = vec![Ipv4Addr::new(10, 0, 0, 1)];
        let mut h2 = Vertex::new_host();
        h2.ip = vec![Ipv4Addr::new(10, 0, 0, 3)];
        let vh1 = graph.add_vertex(h1);
        let vs1 = graph.add_vertex(s1);
        let vh2 = graph.add_vertex(h2);

        let mut up = Edge::new(vh1, vs1);
        up.src_ip = vec![Ipv4Addr::new(10, 0, 0, 2)];
        up.dst_dpid = 1;
        up.dst_interface = 3;
        let mut down = Edge::new(vs1, vh1);
        down.src_dpid = 1;
        down.src_ip = vec![Ipv4Addr::new(10, 0, 0, 1)];
        down.src_interface = 3;
        down.dst_ip = vec![Ipv4Addr::new(10, 0, 0, 2)];
        let f = graph.add_edge(up);
        let r = graph.add_edge(down);
        graph.link_reverse(f, r);

        let mut out = Edge::new(vs1, vh2);
        out.src_dpid = 1;
        out.src_ip = vec![Ipv4Addr::new(10, 0, 0, 1)];
        out.src_interface = 4;
        out.dst_ip = vec![Ipv4Addr::new(10, 0, 0, 3)];
        let mut back = Edge::new(vh2, vs1);
        back.src_ip = vec![Ipv4Addr::new(10, 0, 0, 3)];
        back.dst_dpid = 1;
        back.dst_interface = 4;
        let f2 = graph.add_edge(out);
        let r2 = graph.add_edge(back);
        graph.link_reverse(f2, r2);
        Arc::new(graph)
    }

    #[test]
    fn counter_sample_deltas_update_link_residual_bandwidth() {
        let graph = seeded_graph();
        let c = Collector::new(
            graph.clone(),
            Arc::new(Classifier::new()),
            Arc::new(EventBus::new()),
            CollectorConfig::default(),
        );

        let mk = |in_octets, out_octets| CounterSampleData {
            if_index: 3,
            if_speed: 1_000_000_000,
            if_in_octets: in_octets,
            if_out_octets: out_octets,
        };
        // Agent 10.0.0.1 port 3 is `down`'s src; first report seeds only.
        c.handle_counter_sample(Ipv4Addr::new(10, 0, 0, 1), mk(0, 0), Timestamp::from_millis(1_000));
        // One second later, 12.5 MB out = 100 Mbps.
        c.handle_counter_sample(Ipv4Addr::new(10, 0, 0, 1), mk(0, 12_500_000), Timestamp::from_millis(2_000));

        let edge = graph.find_edge_by_agent_and_port(Ipv4Addr::new(10, 0, 0, 1), 3).unwrap();
        graph.with_edge(edge, |e| {
            assert_eq!(e.link_bandwidth_usage, 100_000_000);
            assert_eq!(e.left_bandwidth, 900_000_000);
            assert!((e.link_bandwidth_utilization - 10.0).abs() < 0.01);
        });
    }

    #[test]
    fn flow_path_query_tick_attributes_active_flows() {
        use serde_json::json;
        let graph = seeded_graph();
        let classifier = Arc::new(Classifier::new());
        classifier.update_from_queried_tables(&json!([{"dpid": 1, "flows": [
            {"priority": 10, "match": {"eth_type": 2048, "ipv4_dst": "10.0.0.3"}, "actions": ["OUTPUT:4"]}
        ]}]));

        let c = Collector::new(graph, classifier, Arc::new(EventBus::new()), CollectorConfig::default());
        c.handle_flow_sample(Ipv4Addr::new(10, 0, 0, 1), flow_sample(4444, 1000, 0), Timestamp::from_millis(0));
        c.run_flow_path_query_tick();

        let key = FlowKey::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3), 4444, 80, 6);
        let table = c.flow_table.read();
        assert_eq!(table.get(&key).unwrap().flow_path, Some(vec![(1, 4)]));
        drop(table);
        assert_eq!(
            c.path_map().get(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3)),
            Some(vec![(1, 4)])
        );
    }
}
