use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use filter_common::audit::{AuditSink, StatusType};
use filter_common::health::{ComponentStatus, HealthHandle};
use filter_common::transport::{Subscriber, Transport};
use futures::FutureExt;
use request_validator::RequestChecker;
use tokio::sync::{mpsc, Barrier, Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::router::{RoutingDecision, Router};
use crate::stages::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Initializing,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub workers: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
    /// How long an idle worker waits on the queue before checking in again.
    pub poll_interval: time::Duration,
}

/// Collaborators shared by every pipeline of the service.
#[derive(Clone)]
pub struct Shared {
    pub checker: Arc<RequestChecker>,
    pub router: Arc<Router>,
    pub transport: Arc<dyn Transport>,
    pub audit: Arc<dyn AuditSink>,
}

/// A queued item and the payload it was decoded from, kept for the audit trail.
struct Envelope<T> {
    item: T,
    raw: String,
}

type Queue<T> = Arc<Mutex<mpsc::Receiver<Envelope<T>>>>;

struct Lifecycle<T> {
    state: PipelineState,
    /// Present only while Running. Dropping it closes the queue to new items.
    sender: Option<mpsc::Sender<Envelope<T>>>,
    workers: JoinSet<()>,
}

/// A bounded queue and its worker pool for one kind of message.
///
/// Workers validate each item, publish the routing decisions and record audit entries. Nothing
/// a worker does on one item can take the pool down: errors are logged and panics are caught.
pub struct Pipeline<S: Stage> {
    stage: S,
    inbound_topic: String,
    settings: PipelineSettings,
    shared: Shared,
    liveness: HealthHandle,
    readiness: HealthHandle,
    /// Enqueues hold the read side while sending, shutdown takes the write side to flip state.
    lifecycle: RwLock<Lifecycle<S::Item>>,
    drain: CancellationToken,
}

impl<S: Stage> Pipeline<S> {
    pub fn new(
        stage: S,
        inbound_topic: impl Into<String>,
        settings: PipelineSettings,
        shared: Shared,
        liveness: HealthHandle,
        readiness: HealthHandle,
    ) -> Self {
        Self {
            stage,
            inbound_topic: inbound_topic.into(),
            settings,
            shared,
            liveness,
            readiness,
            lifecycle: RwLock::new(Lifecycle {
                state: PipelineState::Uninitialized,
                sender: None,
                workers: JoinSet::new(),
            }),
            drain: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        S::KIND.as_str()
    }

    pub async fn state(&self) -> PipelineState {
        self.lifecycle.read().await.state
    }

    /// Start the workers, wait until every one of them is polling, then subscribe to the
    /// inbound topic.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), PipelineError> {
        {
            let mut lifecycle = self.lifecycle.write().await;
            if lifecycle.state != PipelineState::Uninitialized {
                return Err(PipelineError::AlreadyInitialized(self.name()));
            }
            lifecycle.state = PipelineState::Initializing;

            let workers = self.settings.workers.get();
            let (sender, receiver) = mpsc::channel(self.settings.queue_capacity.get());
            let queue: Queue<S::Item> = Arc::new(Mutex::new(receiver));
            let barrier = Arc::new(Barrier::new(workers + 1));

            for id in 0..workers {
                lifecycle.workers.spawn(Arc::clone(self).run_worker(
                    id,
                    queue.clone(),
                    barrier.clone(),
                ));
            }
            barrier.wait().await;

            lifecycle.sender = Some(sender);
            lifecycle.state = PipelineState::Running;
            info!(pipeline = self.name(), workers, "pipeline running");
        }

        self.readiness.report_status(ComponentStatus::Ready);
        let subscriber: Arc<dyn Subscriber> = self.clone();
        self.shared
            .transport
            .subscribe(&self.inbound_topic, subscriber)
            .await?;
        Ok(())
    }

    /// Queue an item, waiting for room if the queue is full.
    pub async fn enqueue(&self, item: S::Item) -> Result<(), PipelineError> {
        let raw = serde_json::to_string(&item).unwrap_or_default();
        self.enqueue_envelope(Envelope { item, raw }).await
    }

    async fn enqueue_envelope(&self, envelope: Envelope<S::Item>) -> Result<(), PipelineError> {
        let lifecycle = self.lifecycle.read().await;
        match lifecycle.state {
            PipelineState::Running => {}
            PipelineState::Uninitialized | PipelineState::Initializing => {
                return Err(PipelineError::NotInitialized(self.name()))
            }
            PipelineState::Draining | PipelineState::Stopped => {
                return Err(PipelineError::NotAccepting(self.name()))
            }
        }

        let sender = lifecycle
            .sender
            .as_ref()
            .ok_or(PipelineError::QueueClosed(self.name()))?;
        sender
            .send(envelope)
            .await
            .map_err(|_| PipelineError::QueueClosed(self.name()))?;
        metrics::counter!("request_filter_messages_queued_total", &self.labels()).increment(1);
        Ok(())
    }

    /// Stop accepting new items, let the workers drain what is already queued, and return once
    /// every worker has exited. Calling it again after that is a no-op.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let mut workers = {
            let mut lifecycle = self.lifecycle.write().await;
            match lifecycle.state {
                PipelineState::Running => {}
                PipelineState::Draining | PipelineState::Stopped => return Ok(()),
                PipelineState::Uninitialized | PipelineState::Initializing => {
                    return Err(PipelineError::NotInitialized(self.name()))
                }
            }
            lifecycle.state = PipelineState::Draining;
            // No enqueue holds the read side anymore, so nothing can be sent after this.
            drop(lifecycle.sender.take());
            std::mem::take(&mut lifecycle.workers)
        };

        info!(pipeline = self.name(), "draining pipeline");
        self.drain.cancel();

        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                error!(pipeline = self.name(), "worker task failed: {}", err);
            }
        }

        self.lifecycle.write().await.state = PipelineState::Stopped;
        self.readiness.report_status(ComponentStatus::Stopped);
        self.liveness.report_status(ComponentStatus::Stopped);
        info!(pipeline = self.name(), "pipeline stopped");
        Ok(())
    }

    async fn run_worker(self: Arc<Self>, id: usize, queue: Queue<S::Item>, barrier: Arc<Barrier>) {
        barrier.wait().await;
        debug!(pipeline = self.name(), worker = id, "worker started");

        loop {
            self.liveness.report_healthy();

            // Once draining, the queue can only shrink: an empty poll means we are done.
            let draining = self.drain.is_cancelled();
            let next = {
                let mut receiver = queue.lock().await;
                if draining {
                    receiver.try_recv().ok()
                } else {
                    match tokio::time::timeout(self.settings.poll_interval, receiver.recv()).await
                    {
                        Ok(item) => item,
                        Err(_) => continue,
                    }
                }
            };

            let Some(Envelope { item, raw }) = next else {
                break;
            };

            if AssertUnwindSafe(self.process(item))
                .catch_unwind()
                .await
                .is_err()
            {
                metrics::counter!("request_filter_worker_panics_total", &self.labels())
                    .increment(1);
                error!(pipeline = self.name(), worker = id, "panic while processing message");
                self.shared
                    .audit
                    .log_status(&raw, StatusType::ProcessingFailed)
                    .await;
            }
        }

        debug!(pipeline = self.name(), worker = id, "worker exited");
    }

    async fn process(&self, item: S::Item) {
        let labels = self.labels();
        let now = tokio::time::Instant::now();

        let outcome = self.stage.validate(&self.shared.checker, item);
        let validation = if outcome.passed() { "passed" } else { "failed" };
        metrics::counter!(
            "request_filter_messages_validated_total",
            "pipeline" => self.name(),
            "validation" => validation
        )
        .increment(1);

        for verdict in outcome.verdicts() {
            if let Some(summary) = verdict.summary() {
                info!(
                    pipeline = self.name(),
                    request_id = ?verdict.request_id(),
                    "validation failures: {}",
                    summary
                );
            }
        }
        for (status, message) in outcome.audit_events() {
            self.shared.audit.log_status(&message, status).await;
        }

        for decision in self.shared.router.route(outcome) {
            self.publish(decision).await;
        }

        metrics::counter!("request_filter_messages_processed_total", &labels).increment(1);
        metrics::histogram!("request_filter_processing_duration_seconds", &labels)
            .record(now.elapsed().as_secs_f64());
    }

    async fn publish(&self, decision: RoutingDecision) {
        let payload = match serde_json::to_vec(&decision.payload) {
            Ok(payload) => payload,
            Err(err) => {
                error!(pipeline = self.name(), topic = %decision.topic, "failed to serialize: {}", err);
                return;
            }
        };

        match self
            .shared
            .transport
            .publish(&decision.topic, decision.key.as_deref(), &payload)
            .await
        {
            Ok(()) => {
                metrics::counter!(
                    "request_filter_messages_published_total",
                    "pipeline" => self.name(),
                    "topic" => decision.topic.clone()
                )
                .increment(1);
                debug!(pipeline = self.name(), topic = %decision.topic, key = ?decision.key, "published");
            }
            Err(err) => {
                metrics::counter!(
                    "request_filter_publish_errors_total",
                    "pipeline" => self.name(),
                    "topic" => decision.topic.clone()
                )
                .increment(1);
                error!(
                    pipeline = self.name(),
                    topic = %decision.topic,
                    "failed to publish: {}",
                    err
                );
                self.shared
                    .audit
                    .log_status(&String::from_utf8_lossy(&payload), StatusType::PublishFailed)
                    .await;
            }
        }
    }

    fn labels(&self) -> [(&'static str, &'static str); 1] {
        [("pipeline", self.name())]
    }
}

#[async_trait]
impl<S: Stage> Subscriber for Pipeline<S> {
    /// Decode, then queue. Payloads that do not decode are audited and dropped here.
    async fn on_message(&self, payload: Vec<u8>) {
        metrics::counter!("request_filter_messages_received_total", &self.labels()).increment(1);

        let raw = String::from_utf8_lossy(&payload).into_owned();
        let item = match self.stage.decode(&payload) {
            Ok(item) => item,
            Err(err) => {
                metrics::counter!("request_filter_decode_errors_total", &self.labels())
                    .increment(1);
                warn!(pipeline = self.name(), "dropping undecodable message: {}", err);
                self.shared
                    .audit
                    .log_status(&raw, StatusType::RequestParsingError)
                    .await;
                return;
            }
        };

        if let Err(err) = self.enqueue_envelope(Envelope { item, raw }).await {
            metrics::counter!("request_filter_messages_rejected_total", &self.labels())
                .increment(1);
            warn!(pipeline = self.name(), "rejected inbound message: {}", err);
        }
    }
}
