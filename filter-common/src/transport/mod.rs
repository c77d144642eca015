//! Publish/subscribe plumbing the pipelines sit on.
//!
//! Payloads cross this boundary as raw bytes: decoding belongs to whoever subscribed.
use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use thiserror::Error;

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaConfig, KafkaTransport};
pub use memory::{MemoryTransport, Published};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("kafka client error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("message for {topic} is too big for the broker")]
    MessageTooBig { topic: String },
    #[error("failed to produce to {topic} (timeout)")]
    ProduceCanceled { topic: String },
    #[error("topic {0} already has a subscriber")]
    AlreadySubscribed(String),
    #[error("no subscriber for topic {0}")]
    NoSubscriber(String),
    #[error("publish to {0} rejected")]
    Rejected(String),
    #[error("transport is shut down")]
    Closed,
}

/// Receives every payload delivered on a subscribed topic.
///
/// Deliveries on one topic are awaited one after the other, so a subscriber that waits for
/// room in its queue slows consumption down instead of buffering without bound.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_message(&self, payload: Vec<u8>);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), TransportError>;

    /// Resolves once the broker acknowledged the message. `key` drives partitioning.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), TransportError>;
}
