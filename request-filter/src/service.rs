use std::num::NonZeroUsize;
use std::sync::Arc;

use filter_common::audit::AuditSink;
use filter_common::health::HealthRegistry;
use filter_common::transport::Transport;
use request_validator::RequestChecker;
use tracing::info;

use crate::config::{Config, NonEmptyString};
use crate::error::PipelineError;
use crate::pipeline::{Pipeline, PipelineSettings, Shared};
use crate::router::Router;
use crate::stages::{
    NewRequestStage, PromotedRequestStage, RequestUpdateStage, SampleUpdateStage, Stage,
};

/// The four pipelines of the service, started and stopped together.
pub struct FilterService {
    pub request_filter: Arc<Pipeline<NewRequestStage>>,
    pub request_update: Arc<Pipeline<RequestUpdateStage>>,
    pub sample_update: Arc<Pipeline<SampleUpdateStage>>,
    pub promoted_request: Arc<Pipeline<PromotedRequestStage>>,
}

impl FilterService {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        audit: Arc<dyn AuditSink>,
        liveness: &HealthRegistry,
        readiness: &HealthRegistry,
    ) -> Self {
        let shared = Shared {
            checker: Arc::new(RequestChecker::new(config.cmo_request_filter)),
            router: Arc::new(Router::new(config.topics.outbound())),
            transport,
            audit,
        };
        let builder = Builder {
            config,
            shared,
            liveness,
            readiness,
            deadline: time::Duration::try_from(config.liveness_deadline.0)
                .unwrap_or(time::Duration::seconds(30)),
        };

        Self {
            request_filter: builder.pipeline(
                NewRequestStage,
                &config.topics.request_filter_topic,
                config.request_filter_workers,
            ),
            request_update: builder.pipeline(
                RequestUpdateStage,
                &config.topics.validate_request_update_topic,
                config.request_update_workers,
            ),
            sample_update: builder.pipeline(
                SampleUpdateStage,
                &config.topics.validate_sample_update_topic,
                config.sample_update_workers,
            ),
            promoted_request: builder.pipeline(
                PromotedRequestStage,
                &config.topics.validate_promoted_request_topic,
                config.promoted_request_workers,
            ),
        }
    }

    pub async fn initialize(&self) -> Result<(), PipelineError> {
        self.request_filter.initialize().await?;
        self.request_update.initialize().await?;
        self.sample_update.initialize().await?;
        self.promoted_request.initialize().await?;
        info!("all pipelines running");
        Ok(())
    }

    /// Drains the four pipelines concurrently and reports the first failure.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (request_filter, request_update, sample_update, promoted_request) = tokio::join!(
            self.request_filter.shutdown(),
            self.request_update.shutdown(),
            self.sample_update.shutdown(),
            self.promoted_request.shutdown(),
        );
        request_filter?;
        request_update?;
        sample_update?;
        promoted_request?;
        info!("all pipelines stopped");
        Ok(())
    }
}

struct Builder<'a> {
    config: &'a Config,
    shared: Shared,
    liveness: &'a HealthRegistry,
    readiness: &'a HealthRegistry,
    deadline: time::Duration,
}

impl Builder<'_> {
    fn pipeline<S: Stage>(
        &self,
        stage: S,
        topic: &NonEmptyString,
        workers: NonZeroUsize,
    ) -> Arc<Pipeline<S>> {
        let name = S::KIND.as_str();
        let settings = PipelineSettings {
            workers,
            queue_capacity: self.config.queue_capacity,
            poll_interval: self.config.poll_interval.0,
        };
        Arc::new(Pipeline::new(
            stage,
            topic.as_str(),
            settings,
            self.shared.clone(),
            self.liveness.register(name, self.deadline),
            self.readiness.register(name, self.deadline),
        ))
    }
}
