//! Daemon wiring: builds the NDT core out of its component crates,
//! supervises every periodic task, and owns the shutdown sequence.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ndtwin_classifier::Classifier;
use ndtwin_common::{NdtError, NdtResult};
use ndtwin_device::{DeviceAdapter, DevicePoller, FlowTableCache, PollerConfig};
use ndtwin_dispatcher::{Dispatcher, DispatcherConfig, FlowJob, RuleSender};
use ndtwin_events::{EventBus, NdtEvent};
use ndtwin_graph::GraphStore;
use ndtwin_sflow::{ingest, Collector, CollectorConfig};
use ndtwin_topology::sweeper;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use config::NdtConfig;

/// How long shutdown waits for the task set to drain before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Southbound stand-in that records each burst in the log. The real
/// controller transport is a deployment concern injected at build time;
/// this sender keeps a development daemon honest about what it would
/// have pushed.
pub struct TracingRuleSender;

#[async_trait]
impl RuleSender for TracingRuleSender {
    async fn apply_burst(&self, dpid: u64, jobs: &[FlowJob]) -> NdtResult<()> {
        for job in jobs {
            debug!(dpid, op = ?job.op, priority = job.priority, corr_id = job.corr_id,
                   "flow rule dispatched");
        }
        Ok(())
    }
}

/// The assembled control-plane core plus its supervised task set.
pub struct NdtDaemon {
    config: NdtConfig,
    pub graph: Arc<GraphStore>,
    pub classifier: Arc<Classifier>,
    pub events: Arc<EventBus>,
    pub collector: Arc<Collector>,
    pub poller: Arc<DevicePoller>,
    pub dispatcher: Arc<Dispatcher>,
    pub flow_tables: Arc<FlowTableCache>,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NdtDaemon {
    /// Loads the topology and assembles every component. Fails if the
    /// topology file is missing or malformed; nothing is spawned yet.
    pub fn build(
        config: NdtConfig,
        adapter: Arc<dyn DeviceAdapter>,
        sender: Arc<dyn RuleSender>,
    ) -> NdtResult<Self> {
        let graph = Arc::new(ndtwin_topology::load(&config.topology_file)?);
        Ok(Self::assemble(config, graph, adapter, sender))
    }

    /// Assembles around an already-populated graph (tests, or callers
    /// that build topology programmatically).
    pub fn assemble(
        config: NdtConfig,
        graph: Arc<GraphStore>,
        adapter: Arc<dyn DeviceAdapter>,
        sender: Arc<dyn RuleSender>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        register_log_handlers(&events);

        let classifier = Arc::new(Classifier::new());
        let collector = Arc::new(Collector::new(
            graph.clone(),
            classifier.clone(),
            events.clone(),
            CollectorConfig {
                pure_ack_max_bytes: config.pure_ack_max_bytes,
                flow_idle_timeout_ms: config.flow_idle_timeout_ms,
            },
        ));

        let flow_tables = Arc::new(FlowTableCache::new());
        let poller = Arc::new(DevicePoller::new(
            graph.clone(),
            events.clone(),
            adapter,
            flow_tables.clone(),
            PollerConfig {
                status_interval: Duration::from_secs(config.status_poll_secs),
                flow_table_interval: Duration::from_secs(config.flow_table_poll_secs),
                ping_interval: Duration::from_secs(1),
                ping_retries: config.ping_retries,
                ping_spacing: Duration::from_secs(config.ping_spacing_secs),
                ping_timeout: Duration::from_secs(config.ping_timeout_secs),
            },
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            sender,
            DispatcherConfig {
                burst_size: config.dispatcher_burst_size,
                fence_per_burst: config.dispatcher_fence_per_burst,
            },
        ));

        let (stop, _) = watch::channel(false);
        Self {
            config,
            graph,
            classifier,
            events,
            collector,
            poller,
            dispatcher,
            flow_tables,
            stop,
            tasks: Vec::new(),
        }
    }

    /// Binds the sFlow socket and spawns the full task inventory. A bind
    /// failure is fatal: the process must not claim readiness without
    /// its ingest path.
    pub async fn start(&mut self) -> NdtResult<()> {
        let socket = ingest::bind(self.config.sflow_port)
            .await
            .map_err(|e| NdtError::Fatal(format!("sFlow UDP bind failed: {e}")))?;
        info!(port = self.config.sflow_port, "sFlow collector listening");

        let stop = &self.stop;
        let c = &self.collector;
        self.tasks.push(tokio::spawn(ingest::run_udp_ingest_loop(
            socket,
            c.clone(),
            stop.subscribe(),
        )));
        self.tasks.push(tokio::spawn(ingest::run_periodic_rate_task(c.clone(), stop.subscribe())));
        self.tasks.push(tokio::spawn(ingest::run_immediate_rate_task(c.clone(), stop.subscribe())));
        self.tasks.push(tokio::spawn(ingest::run_idle_purge_task(c.clone(), stop.subscribe())));
        self.tasks.push(tokio::spawn(ingest::run_flow_path_query_task(
            c.clone(),
            Duration::from_millis(self.config.path_query_tick_ms),
            stop.subscribe(),
        )));

        self.tasks.push(tokio::spawn(sweeper::run_ttl_sweeper_task(
            self.graph.clone(),
            stop.subscribe(),
        )));

        let p = &self.poller;
        self.tasks.push(tokio::spawn(ndtwin_device::run_status_task(p.clone(), stop.subscribe())));
        self.tasks.push(tokio::spawn(ndtwin_device::run_flow_table_task(p.clone(), stop.subscribe())));
        self.tasks.push(tokio::spawn(ndtwin_device::run_reachability_task(p.clone(), stop.subscribe())));

        self.tasks.push(tokio::spawn(run_classifier_rebuild_task(
            self.classifier.clone(),
            self.flow_tables.clone(),
            Duration::from_secs(self.config.flow_table_poll_secs),
            stop.subscribe(),
        )));

        info!(tasks = self.tasks.len(), "control-plane task set running");
        Ok(())
    }

    /// Accepts a flow-rule batch document: every entry becomes a
    /// dispatcher job, and the cached flow tables are patched to reflect
    /// the dispatched intent ahead of the next poll.
    pub fn apply_flow_batch(&self, doc: &Value, corr_id: u64) -> NdtResult<usize> {
        let jobs = ndtwin_dispatcher::parse_batch(doc, corr_id)?;
        let count = jobs.len();
        self.dispatcher.enqueue_batch(jobs);

        for (dpid, batch) in ndtwin_device::parse_batch(doc) {
            self.flow_tables.apply_batch(dpid, &batch);
        }
        Ok(count)
    }

    /// Cooperative shutdown: signals every task, drains the dispatcher,
    /// and waits up to the grace period for the task set to join.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        self.dispatcher.shutdown().await;

        let drain = async {
            for task in self.tasks.drain(..) {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("task set did not drain within the shutdown grace period");
        } else {
            info!("all control-plane tasks stopped");
        }
    }
}

/// Rebuilds the classifier from the freshest cached flow tables on the
/// same cadence the tables are polled.
async fn run_classifier_rebuild_task(
    classifier: Arc<Classifier>,
    flow_tables: Arc<FlowTableCache>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => match flow_tables.as_poll_document() {
                Ok(doc) => classifier.update_from_queried_tables(&doc),
                Err(e) => warn!(error = %e, "could not render flow-table cache for the classifier"),
            },
            _ = stop.changed() => return,
        }
    }
}

fn register_log_handlers(events: &EventBus) {
    for topic in [
        "FlowAdded",
        "LinkFailureDetected",
        "IdleFlowPurged",
        "LinkRecoveryDetected",
        "SwitchEntered",
        "SwitchExited",
    ] {
        events.register(
            topic,
            Arc::new(|event: &NdtEvent| {
                debug!(topic = event.topic(), ?event, "core event");
            }),
        );
    }
}
