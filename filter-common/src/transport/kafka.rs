use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use envconfig::Envconfig;
use metrics::{counter, gauge};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Subscriber, Transport, TransportError};
use crate::health::HealthHandle;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "request-filter")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

impl KafkaConfig {
    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("statistics.interval.ms", "10000");

        if self.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };
        client_config
    }
}

struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        gauge!("request_filter_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("request_filter_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
    }
}

/// One shared producer for every outbound topic, one consumer task per subscribed topic.
pub struct KafkaTransport {
    config: KafkaConfig,
    producer: FutureProducer<KafkaContext>,
    consumers: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

impl KafkaTransport {
    pub async fn connect(
        config: KafkaConfig,
        liveness: HealthHandle,
    ) -> Result<KafkaTransport, TransportError> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = config.client_config();
        client_config
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", &config.kafka_compression_codec)
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;

        // "Ping" the Kafka brokers by requesting metadata
        match producer
            .client()
            .fetch_metadata(None, Duration::from_secs(15))
        {
            Ok(metadata) => info!(
                "connected to Kafka brokers, found {} topics",
                metadata.topics().len()
            ),
            Err(err) => {
                error!("failed to fetch metadata from Kafka brokers: {:?}", err);
                return Err(err.into());
            }
        }

        Ok(KafkaTransport {
            config,
            producer,
            consumers: Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Stops every consumer task and waits for them to exit. Deliveries already handed to a
    /// subscriber complete first.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut consumers = self.consumers.lock().await;
        while let Some(result) = consumers.join_next().await {
            if let Err(err) = result {
                error!("kafka consumer task failed: {}", err);
            }
        }
        info!("kafka consumers stopped");
    }

    /// Waits for in-flight produce requests, up to `timeout`.
    pub fn flush(&self, timeout: Duration) -> Result<(), TransportError> {
        self.producer.flush(Timeout::After(timeout))?;
        Ok(())
    }

    fn create_consumer(&self, topic: &str) -> Result<StreamConsumer, KafkaError> {
        let mut client_config = self.config.client_config();
        client_config
            .set("group.id", &self.config.kafka_consumer_group)
            .set("auto.offset.reset", &self.config.kafka_consumer_offset_reset)
            .set("enable.auto.commit", "true");

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;
        Ok(consumer)
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn subscribe(
        &self,
        topic: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let consumer = self.create_consumer(topic)?;
        info!(topic, "subscribed");

        self.consumers.lock().await.spawn(run_consumer(
            consumer,
            topic.to_owned(),
            subscriber,
            self.shutdown.clone(),
        ));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let record = FutureRecord {
            topic,
            key,
            payload: Some(payload),
            timestamp: None,
            partition: None,
            headers: None,
        };

        let ack = match self.producer.send_result(record) {
            Ok(ack) => ack,
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _)) => {
                counter!("request_filter_kafka_produce_errors_total", "topic" => topic.to_owned())
                    .increment(1);
                return Err(TransportError::MessageTooBig {
                    topic: topic.to_owned(),
                });
            }
            Err((err, _)) => {
                counter!("request_filter_kafka_produce_errors_total", "topic" => topic.to_owned())
                    .increment(1);
                return Err(err.into());
            }
        };

        match ack.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((err, _))) => {
                counter!("request_filter_kafka_produce_errors_total", "topic" => topic.to_owned())
                    .increment(1);
                Err(match err {
                    KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge) => {
                        TransportError::MessageTooBig {
                            topic: topic.to_owned(),
                        }
                    }
                    err => err.into(),
                })
            }
            // Canceled due to timeout while retrying
            Err(_) => {
                counter!("request_filter_kafka_produce_errors_total", "topic" => topic.to_owned())
                    .increment(1);
                Err(TransportError::ProduceCanceled {
                    topic: topic.to_owned(),
                })
            }
        }
    }
}

async fn run_consumer(
    consumer: StreamConsumer,
    topic: String,
    subscriber: Arc<dyn Subscriber>,
    shutdown: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = consumer.recv() => match result {
                Ok(message) => message.payload().map(<[u8]>::to_vec),
                Err(err) => {
                    error!(topic = %topic, "kafka consumer error: {}", err);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let Some(payload) = payload else {
            warn!(topic = %topic, "skipping message with empty payload");
            continue;
        };
        counter!("request_filter_kafka_messages_received_total", "topic" => topic.clone())
            .increment(1);
        subscriber.on_message(payload).await;
    }
    info!(topic = %topic, "kafka consumer shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRegistry;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};

    async fn start_on_mocked_cluster() -> (MockCluster<'static, DefaultProducerContext>, KafkaTransport)
    {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("kafka", time::Duration::seconds(30));

        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let config = KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 5000,
            kafka_compression_codec: "none".to_string(),
            kafka_hosts: cluster.bootstrap_servers(),
            kafka_tls: false,
            kafka_consumer_group: "request-filter-test".to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
        };
        let transport = KafkaTransport::connect(config, handle)
            .await
            .expect("failed to create mocked transport");
        (cluster, transport)
    }

    #[tokio::test]
    async fn publish_error_handling() {
        let (cluster, transport) = start_on_mocked_cluster().await;
        let payload = br#"{"requestId":"1456_T","samples":[]}"#;

        // Wait for producer to be healthy, to keep kafka_message_timeout_ms short and tests faster
        for _ in 0..20 {
            if transport
                .publish("NEW_REQUEST", Some("1456_T"), payload)
                .await
                .is_ok()
            {
                break;
            }
        }

        transport
            .publish("NEW_REQUEST", Some("1456_T"), payload)
            .await
            .expect("failed to publish initial message");
        transport
            .publish("CMO_LABEL_UPDATE", None, payload)
            .await
            .expect("failed to publish unkeyed message");

        // Producer should reject a 2MB message, twice the default `message.max.bytes`
        let big_payload = vec![b'a'; 2_000_000];
        match transport.publish("NEW_REQUEST", None, &big_payload).await {
            Err(TransportError::MessageTooBig { topic }) => assert_eq!(topic, "NEW_REQUEST"),
            Err(err) => panic!("wrong error {}", err),
            Ok(()) => panic!("should have errored"),
        };

        // Unretriable broker error
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_MSG_SIZE_TOO_LARGE; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        assert!(transport
            .publish("NEW_REQUEST", Some("1456_T"), payload)
            .await
            .is_err());

        // Transient errors are retried by the producer
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_BROKER_NOT_AVAILABLE; 2];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        transport
            .publish("NEW_REQUEST", Some("1456_T"), payload)
            .await
            .expect("failed to publish after recovery");
        cluster.clear_request_errors(RDKafkaApiKey::Produce);

        transport
            .flush(Duration::from_secs(5))
            .expect("failed to flush");
    }

    #[tokio::test]
    async fn subscribe_after_shutdown_is_rejected() {
        let (_cluster, transport) = start_on_mocked_cluster().await;

        struct Ignore;
        #[async_trait]
        impl Subscriber for Ignore {
            async fn on_message(&self, _payload: Vec<u8>) {}
        }

        transport
            .subscribe("IGO_NEW_REQUEST", Arc::new(Ignore))
            .await
            .expect("subscribe");
        transport.shutdown().await;

        assert!(matches!(
            transport
                .subscribe("IGO_REQUEST_UPDATE", Arc::new(Ignore))
                .await,
            Err(TransportError::Closed)
        ));
    }
}
