use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{Subscriber, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl Published {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// In-process transport: records every publish and lets callers push payloads to subscribers.
#[derive(Default)]
pub struct MemoryTransport {
    subscribers: RwLock<HashMap<String, Arc<dyn Subscriber>>>,
    published: Mutex<Vec<Published>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `payload` to the subscriber of `topic`, returning once it was accepted.
    pub async fn deliver(
        &self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let subscriber = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
            .ok_or_else(|| TransportError::NoSubscriber(topic.to_owned()))?;
        subscriber.on_message(payload.into()).await;
        Ok(())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(topic)
    }

    /// Every later publish to `topic` fails with [`TransportError::Rejected`].
    pub fn fail_topic(&self, topic: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_owned());
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|message| message.topic == topic)
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), TransportError> {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.contains_key(topic) {
            return Err(TransportError::AlreadySubscribed(topic.to_owned()));
        }
        subscribers.insert(topic.to_owned(), subscriber);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(topic)
        {
            return Err(TransportError::Rejected(topic.to_owned()));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Published {
                topic: topic.to_owned(),
                key: key.map(str::to_owned),
                payload: payload.to_vec(),
            });
        Ok(())
    }
}
