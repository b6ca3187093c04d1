//! Per-datapath serialised dispatch: one FIFO queue and one lazily
//! spawned worker per dpid, draining jobs in bursts to the southbound
//! sender. Strict FIFO within a dpid; no ordering across dpids.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ndtwin_common::{AtomicCounter, NdtResult};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::job::FlowJob;

/// Southbound seam: applies a burst of jobs through the external
/// controller API. The dispatcher never holds any lock while calling
/// into this trait.
#[async_trait]
pub trait RuleSender: Send + Sync {
    /// Applies each job in order. A failed job is the sender's problem to
    /// log; the burst as a whole only fails if the southbound target is
    /// unreachable.
    async fn apply_burst(&self, dpid: u64, jobs: &[FlowJob]) -> NdtResult<()>;

    /// Southbound barrier, issued after a burst when `fence_per_burst`
    /// is set. Default is a no-op for senders without barrier support.
    async fn barrier(&self, _dpid: u64) -> NdtResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum jobs handed to the sender per worker wakeup.
    pub burst_size: usize,
    /// Issue a southbound barrier after each burst.
    pub fence_per_burst: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            burst_size: 2000,
            fence_per_burst: false,
        }
    }
}

struct WorkerEntry {
    tx: mpsc::UnboundedSender<FlowJob>,
    handle: JoinHandle<()>,
}

/// The flow-rule dispatcher. Enqueue is accepted per-job or per-batch;
/// each dpid gets its own queue and worker task, spawned on first use.
pub struct Dispatcher {
    config: DispatcherConfig,
    sender: Arc<dyn RuleSender>,
    workers: Mutex<HashMap<u64, WorkerEntry>>,
    jobs_dispatched: AtomicCounter,
}

impl Dispatcher {
    pub fn new(sender: Arc<dyn RuleSender>, config: DispatcherConfig) -> Self {
        Self {
            config,
            sender,
            workers: Mutex::new(HashMap::new()),
            jobs_dispatched: AtomicCounter::new(0),
        }
    }

    /// Enqueues one job onto its dpid's FIFO queue, spawning the worker
    /// if this is the first job for that dpid.
    pub fn enqueue(&self, job: FlowJob) {
        self.jobs_dispatched.inc();
        let mut workers = self.workers.lock();
        let entry = workers
            .entry(job.dpid)
            .or_insert_with(|| self.spawn_worker(job.dpid));
        if entry.tx.send(job).is_err() {
            warn!("dispatcher worker queue closed; job dropped");
        }
    }

    /// Enqueues a batch in order. Jobs for the same dpid keep their
    /// relative order; jobs for different dpids fan out to independent
    /// queues.
    pub fn enqueue_batch(&self, jobs: Vec<FlowJob>) {
        for job in jobs {
            self.enqueue(job);
        }
    }

    pub fn active_dpids(&self) -> Vec<u64> {
        self.workers.lock().keys().copied().collect()
    }

    pub fn jobs_enqueued(&self) -> u64 {
        self.jobs_dispatched.get()
    }

    fn spawn_worker(&self, dpid: u64) -> WorkerEntry {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = self.sender.clone();
        let burst_size = self.config.burst_size;
        let fence = self.config.fence_per_burst;
        let handle = tokio::spawn(worker_loop(dpid, rx, sender, burst_size, fence));
        debug!(dpid, "spawned dispatcher worker");
        WorkerEntry { tx, handle }
    }

    /// Cooperative shutdown: closes every queue so workers drain what
    /// they have and exit, then waits for them to finish.
    pub async fn shutdown(&self) {
        let entries: Vec<WorkerEntry> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, e)| e).collect()
        };
        // Dropping tx closes the channel; recv returns None once drained.
        for entry in entries {
            drop(entry.tx);
            if let Err(e) = entry.handle.await {
                warn!(error = %e, "dispatcher worker terminated abnormally");
            }
        }
    }
}

async fn worker_loop(
    dpid: u64,
    mut rx: mpsc::UnboundedReceiver<FlowJob>,
    sender: Arc<dyn RuleSender>,
    burst_size: usize,
    fence: bool,
) {
    while let Some(first) = rx.recv().await {
        let mut burst = Vec::with_capacity(burst_size.min(64));
        burst.push(first);
        while burst.len() < burst_size {
            match rx.try_recv() {
                Ok(job) => burst.push(job),
                Err(_) => break,
            }
        }

        if let Err(e) = sender.apply_burst(dpid, &burst).await {
            // Individual job failures stay inside the sender; a burst
            // error means the southbound target is unreachable. Drop the
            // burst and keep serving the queue so a recovered target
            // sees subsequent jobs.
            warn!(dpid, error = %e, burst_len = burst.len(), "southbound burst failed");
            continue;
        }
        if fence {
            if let Err(e) = sender.barrier(dpid).await {
                warn!(dpid, error = %e, "southbound barrier failed");
            }
        }
    }
    debug!(dpid, "dispatcher worker drained and exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FlowOp;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingSender {
        seen: Mutex<Vec<(u64, FlowOp, u32)>>,
        barriers: AtomicUsize,
    }

    impl RecordingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                barriers: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RuleSender for RecordingSender {
        async fn apply_burst(&self, dpid: u64, jobs: &[FlowJob]) -> NdtResult<()> {
            let mut seen = self.seen.lock();
            for job in jobs {
                seen.push((dpid, job.op, job.dst_ip_u32));
            }
            Ok(())
        }

        async fn barrier(&self, _dpid: u64) -> NdtResult<()> {
            self.barriers.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn job(dpid: u64, op: FlowOp, last_octet: u8) -> FlowJob {
        FlowJob {
            dpid,
            op,
            priority: 100,
            match_fields: json!({"ipv4_dst": format!("10.0.0.{last_octet}")}),
            actions: json!(["OUTPUT:2"]),
            dst_ip_u32: u32::from(std::net::Ipv4Addr::new(10, 0, 0, last_octet)),
            idle_timeout: None,
            corr_id: 0,
        }
    }

    #[tokio::test]
    async fn install_then_delete_reach_the_sender_in_that_order() {
        let sender = RecordingSender::new();
        let dispatcher = Dispatcher::new(sender.clone(), DispatcherConfig::default());

        dispatcher.enqueue(job(1, FlowOp::Install, 5));
        dispatcher.enqueue(job(1, FlowOp::Delete, 5));
        dispatcher.shutdown().await;

        let seen = sender.seen.lock();
        assert_eq!(
            *seen,
            vec![
                (1, FlowOp::Install, u32::from(std::net::Ipv4Addr::new(10, 0, 0, 5))),
                (1, FlowOp::Delete, u32::from(std::net::Ipv4Addr::new(10, 0, 0, 5))),
            ]
        );
    }

    #[tokio::test]
    async fn fifo_holds_across_a_long_batch_on_one_dpid() {
        let sender = RecordingSender::new();
        let dispatcher = Dispatcher::new(sender.clone(), DispatcherConfig::default());

        let batch: Vec<FlowJob> = (0..100).map(|i| job(3, FlowOp::Install, i as u8)).collect();
        dispatcher.enqueue_batch(batch);
        dispatcher.shutdown().await;

        let seen = sender.seen.lock();
        assert_eq!(seen.len(), 100);
        for (i, (dpid, _, dst)) in seen.iter().enumerate() {
            assert_eq!(*dpid, 3);
            assert_eq!(*dst, u32::from(std::net::Ipv4Addr::new(10, 0, 0, i as u8)));
        }
    }

    #[tokio::test]
    async fn each_dpid_gets_its_own_worker() {
        let sender = RecordingSender::new();
        let dispatcher = Dispatcher::new(sender.clone(), DispatcherConfig::default());

        dispatcher.enqueue(job(1, FlowOp::Install, 1));
        dispatcher.enqueue(job(2, FlowOp::Install, 2));

        let mut dpids = dispatcher.active_dpids();
        dpids.sort_unstable();
        assert_eq!(dpids, vec![1, 2]);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn fence_per_burst_issues_a_barrier() {
        let sender = RecordingSender::new();
        let dispatcher = Dispatcher::new(
            sender.clone(),
            DispatcherConfig {
                fence_per_burst: true,
                ..DispatcherConfig::default()
            },
        );

        dispatcher.enqueue(job(1, FlowOp::Install, 1));
        dispatcher.shutdown().await;

        assert!(sender.barriers.load(Ordering::SeqCst) >= 1);
    }

    struct FailingSender;

    #[async_trait]
    impl RuleSender for FailingSender {
        async fn apply_burst(&self, _dpid: u64, _jobs: &[FlowJob]) -> NdtResult<()> {
            Err(ndtwin_common::NdtError::ExternalIo("controller unreachable".into()))
        }
    }

    #[tokio::test]
    async fn sender_failure_does_not_kill_the_worker() {
        let dispatcher = Dispatcher::new(Arc::new(FailingSender), DispatcherConfig::default());
        dispatcher.enqueue(job(1, FlowOp::Install, 1));
        dispatcher.enqueue(job(1, FlowOp::Install, 2));
        // Shutdown still joins cleanly: the worker logged and carried on.
        dispatcher.shutdown().await;
    }
}
