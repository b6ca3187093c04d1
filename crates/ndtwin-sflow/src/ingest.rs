//! The UDP ingest loop and the periodic/immediate/idle-purge tasks it
//! runs alongside. Kept free of any binary-specific wiring (tracing
//! init, shutdown flags); that belongs to the daemon that owns the
//! tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use ndtwin_common::{Timestamp, BUFFER_SIZE, TIME_UNIT_INTERVAL_MS};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::warn;

use crate::collector::Collector;

/// Maximum datagrams drained per poll wakeup before yielding back to the
/// runtime, bounding how long one iteration can hog the task.
const MAX_DATAGRAMS_PER_POLL: usize = 32;
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Binds the collector's UDP socket on the sFlow port.
pub async fn bind(port: u16) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(("0.0.0.0", port)).await
}

/// Drains up to `MAX_DATAGRAMS_PER_POLL` datagrams per 1s poll window,
/// handing each to the collector, until `stop` fires.
pub async fn run_udp_ingest_loop(socket: UdpSocket, collector: Arc<Collector>, mut stop: watch::Receiver<bool>) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        if *stop.borrow() {
            return;
        }
        for _ in 0..MAX_DATAGRAMS_PER_POLL {
            match tokio::time::timeout(POLL_TIMEOUT, socket.recv_from(&mut buf)).await {
                Ok(Ok((n, _addr))) => collector.ingest_datagram(&buf[..n], Timestamp::now()),
                Ok(Err(e)) => {
                    warn!(error = %e, "sflow socket recv failed");
                    break;
                }
                Err(_) => break, // poll timeout elapsed; re-check stop and loop
            }
            if *stop.borrow() {
                return;
            }
        }
    }
}

/// 1 Hz periodic rate recompute task.
pub async fn run_periodic_rate_task(collector: Arc<Collector>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_millis(TIME_UNIT_INTERVAL_MS));
    while !*stop.borrow() {
        interval.tick().await;
        collector.run_periodic_rate_tick();
        if stop.has_changed().unwrap_or(false) {
            let _ = stop.changed().await;
        }
    }
}

/// Immediate rate recompute task, firing at a random cadence between 0.5
/// and 2.0 seconds so immediate-rate ticks across collectors don't
/// phase-lock.
pub async fn run_immediate_rate_task(collector: Arc<Collector>, mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        let delay_ms = rand::thread_rng().gen_range(500..=2000);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if *stop.borrow() {
            return;
        }
        collector.run_immediate_rate_tick(Timestamp::now());
    }
}

/// Flow-path-by-query task: re-walks every active flow's forwarding
/// path against the latest classifier state on a tight cadence so path
/// attribution tracks rule changes closely.
pub async fn run_flow_path_query_task(
    collector: Arc<Collector>,
    tick: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    while !*stop.borrow() {
        interval.tick().await;
        collector.run_flow_path_query_tick();
        if stop.has_changed().unwrap_or(false) {
            let _ = stop.changed().await;
        }
    }
}

/// 1 Hz idle-flow purge task.
pub async fn run_idle_purge_task(collector: Arc<Collector>, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_millis(TIME_UNIT_INTERVAL_MS));
    while !*stop.borrow() {
        interval.tick().await;
        collector.run_idle_purge_tick(Timestamp::now());
        if stop.has_changed().unwrap_or(false) {
            let _ = stop.changed().await;
        }
    }
}
