//! Replication controller.
//!
//! Wires the pieces together: one watch pump per replicated kind feeding the
//! work queue, a pool of reconcile workers draining it, and the drift
//! corrector re-enqueueing everything on a timer. A pump whose stream ends
//! resubscribes with backoff and resyncs its kind once reconnected.
//! Shutdown cancels a shared token, closes the queue and waits for every task.

use crate::backoff::BackoffConfig;
use crate::config::ControllerConfig;
use crate::drift::DriftCorrector;
use crate::error::{ReplError, Result};
use crate::kinds::AdapterRegistry;
use crate::metrics::{render, ReconcileMetrics, Sample};
use crate::object::{ResourceIdentity, ResourceKind};
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::store::{CacheStore, SourceReader, WatchEvent};
use crate::writer::CacheWriter;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Constructed, not started.
    Idle,
    /// Watching, reconciling and resyncing.
    Running,
    /// Shutdown requested; waiting for tasks to finish.
    Draining,
    /// All tasks have exited.
    Stopped,
}

/// Keeps the cache store in agreement with one shard's source store.
pub struct Controller {
    config: ControllerConfig,
    source: Arc<dyn SourceReader>,
    writer: CacheWriter,
    adapters: AdapterRegistry,
    queue: WorkQueue<ResourceIdentity>,
    metrics: Arc<ReconcileMetrics>,
    cancel: CancellationToken,
    state: Mutex<ControllerState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Create a controller for the kinds named in `config`.
    pub fn new(config: ControllerConfig, source: Arc<dyn SourceReader>, cache: Arc<dyn CacheStore>) -> Result<Self> {
        let adapters = AdapterRegistry::from_kinds(&config.kinds);
        Self::with_adapters(config, source, cache, adapters)
    }

    /// Create a controller with explicit kind adapters. `config.kinds` is ignored.
    pub fn with_adapters(
        config: ControllerConfig,
        source: Arc<dyn SourceReader>,
        cache: Arc<dyn CacheStore>,
        adapters: AdapterRegistry,
    ) -> Result<Self> {
        config.validate()?;
        if adapters.is_empty() {
            return Err(ReplError::Config {
                msg: "at least one kind adapter is required".to_string(),
            });
        }
        let queue = WorkQueue::new(config.backoff());
        Ok(Self {
            config,
            source,
            writer: CacheWriter::new(cache),
            adapters,
            queue,
            metrics: Arc::new(ReconcileMetrics::new()),
            cancel: CancellationToken::new(),
            state: Mutex::new(ControllerState::Idle),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to source changes and start the workers and the drift corrector.
    ///
    /// Watches are established before the first resync pass, so no change
    /// between the two is missed.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != ControllerState::Idle {
            return Err(ReplError::Invalid {
                msg: format!("controller cannot start from state {:?}", *state),
            });
        }

        let mut streams = Vec::new();
        for kind in self.adapters.kinds() {
            let events = self.source.watch(&kind).await?;
            streams.push((kind, events));
        }

        let drift = Arc::new(DriftCorrector::new(
            self.source.clone(),
            self.writer.clone(),
            self.adapters.clone(),
            self.config.shard_name(),
            self.queue.clone(),
            self.config.resync_period(),
            self.metrics.clone(),
        ));

        let mut tasks = Vec::new();
        for (kind, events) in streams {
            let pump = WatchPump {
                kind,
                source: self.source.clone(),
                drift: drift.clone(),
                queue: self.queue.clone(),
                backoff: self.config.backoff(),
                metrics: self.metrics.clone(),
            };
            tasks.push(tokio::spawn(pump.run(events, self.cancel.clone())));
        }

        let reconciler = Arc::new(Reconciler::new(
            self.source.clone(),
            self.writer.clone(),
            self.adapters.clone(),
            self.config.shard_name(),
            self.config.max_conflict_retries,
            self.metrics.clone(),
        ));
        for worker_id in 0..self.config.workers {
            tasks.push(tokio::spawn(run_worker(
                worker_id,
                reconciler.clone(),
                self.queue.clone(),
                self.cancel.clone(),
            )));
        }

        tasks.push(tokio::spawn(drift.run(self.cancel.clone())));

        self.tasks.lock().await.extend(tasks);
        *state = ControllerState::Running;
        info!(
            shard = %self.config.shard,
            workers = self.config.workers,
            kinds = ?self.adapters.kinds(),
            "replication controller started"
        );
        Ok(())
    }

    /// Stop all tasks and wait for them. In-flight reconciles stop at their next I/O boundary.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            match *state {
                ControllerState::Stopped | ControllerState::Draining => return,
                ControllerState::Idle => {
                    self.cancel.cancel();
                    self.queue.shut_down().await;
                    *state = ControllerState::Stopped;
                    return;
                }
                ControllerState::Running => *state = ControllerState::Draining,
            }
        }

        self.cancel.cancel();
        self.queue.shut_down().await;
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "controller task ended abnormally");
            }
        }

        *self.state.lock().await = ControllerState::Stopped;
        info!(shard = %self.config.shard, "replication controller stopped");
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }

    /// Request a reconcile of `identity` outside of watch and resync.
    pub async fn enqueue(&self, identity: ResourceIdentity) {
        self.queue.add(identity).await;
    }

    /// The controller's work queue.
    pub fn queue(&self) -> &WorkQueue<ResourceIdentity> {
        &self.queue
    }

    /// Shared reconcile counters.
    pub fn metrics(&self) -> &Arc<ReconcileMetrics> {
        &self.metrics
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Counters plus queue gauges in Prometheus text format.
    pub async fn prometheus(&self) -> String {
        let mut samples = self.metrics.samples();
        samples.push(Sample::gauge(
            "shardcache_repl_queue_depth",
            "Identities waiting for a worker",
            self.queue.len().await as u64,
        ));
        samples.push(Sample::gauge(
            "shardcache_repl_in_flight",
            "Identities being reconciled",
            self.queue.processing().await as u64,
        ));
        render(&self.config.shard, &samples)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Feeds one kind's watch events into the queue.
struct WatchPump {
    kind: ResourceKind,
    source: Arc<dyn SourceReader>,
    drift: Arc<DriftCorrector>,
    queue: WorkQueue<ResourceIdentity>,
    backoff: BackoffConfig,
    metrics: Arc<ReconcileMetrics>,
}

impl WatchPump {
    async fn run(self, mut events: mpsc::UnboundedReceiver<WatchEvent>, cancel: CancellationToken) {
        // Consecutive resubscriptions without an event in between.
        let mut restarts = 0u32;
        loop {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => match event {
                        Some(event) => {
                            restarts = 0;
                            debug!(kind = %self.kind, identity = %event.identity, event = ?event.event_type, "watch event");
                            self.queue.add(event.identity).await;
                        }
                        None => break,
                    },
                }
            }

            warn!(kind = %self.kind, "watch stream closed, resubscribing");
            events = match self.resubscribe(&mut restarts, &cancel).await {
                Some(events) => events,
                None => return,
            };
            // Changes made while the stream was down produced no events.
            let enqueued = self.drift.resync_kind(&self.kind).await;
            info!(kind = %self.kind, enqueued, "watch re-established");
        }
    }

    /// Retries `watch` with backoff until it succeeds. `None` once `cancel` fires.
    async fn resubscribe(
        &self,
        restarts: &mut u32,
        cancel: &CancellationToken,
    ) -> Option<mpsc::UnboundedReceiver<WatchEvent>> {
        loop {
            let delay = self.backoff.delay_for(*restarts);
            *restarts = restarts.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.source.watch(&self.kind).await {
                Ok(events) => {
                    self.metrics.inc_watch_restarts();
                    return Some(events);
                }
                Err(e) => warn!(
                    kind = %self.kind,
                    error = %e,
                    attempt = *restarts,
                    "watch resubscribe failed"
                ),
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    reconciler: Arc<Reconciler>,
    queue: WorkQueue<ResourceIdentity>,
    cancel: CancellationToken,
) {
    while let Some(identity) = queue.get().await {
        match reconciler.reconcile(&identity, &cancel).await {
            Ok(report) => {
                queue.forget(&identity).await;
                debug!(worker_id, %identity, outcome = ?report.outcome, writes = report.writes, "reconciled");
            }
            Err(ReplError::Shutdown) => {
                queue.done(&identity).await;
                break;
            }
            Err(e) => {
                let metrics = reconciler.metrics();
                metrics.inc_failures();
                metrics.inc_requeues();
                let delay = queue.add_rate_limited(identity.clone()).await;
                warn!(
                    worker_id,
                    %identity,
                    error = %e,
                    kind = e.kind_label(),
                    retry_in_ms = delay.as_millis() as u64,
                    "reconcile failed, requeued"
                );
            }
        }
        queue.done(&identity).await;
    }
    debug!(worker_id, "worker exiting");
}
