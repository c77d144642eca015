use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use filter_common::transport::KafkaConfig;

use crate::router::OutboundTopics;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub topics: TopicConfig,

    #[envconfig(default = "1")]
    pub request_filter_workers: NonZeroUsize,

    #[envconfig(default = "1")]
    pub request_update_workers: NonZeroUsize,

    #[envconfig(default = "1")]
    pub sample_update_workers: NonZeroUsize,

    #[envconfig(default = "1")]
    pub promoted_request_workers: NonZeroUsize,

    #[envconfig(default = "1000")]
    pub queue_capacity: NonZeroUsize,

    #[envconfig(default = "100")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub liveness_deadline: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub flush_timeout: EnvMsDuration,

    /// Reject every request that is not flagged as CMO.
    #[envconfig(default = "false")]
    pub cmo_request_filter: bool,

    /// Audit trail file; without it audit entries only go to the logs.
    pub request_logger_filepath: Option<NonEmptyString>,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct TopicConfig {
    #[envconfig(default = "IGO.REQUEST_FILTER")]
    pub request_filter_topic: NonEmptyString,

    #[envconfig(default = "IGO.VALIDATE_REQUEST_UPDATE")]
    pub validate_request_update_topic: NonEmptyString,

    #[envconfig(default = "IGO.VALIDATE_SAMPLE_UPDATE")]
    pub validate_sample_update_topic: NonEmptyString,

    #[envconfig(default = "IGO.VALIDATE_PROMOTED_REQUEST")]
    pub validate_promoted_request_topic: NonEmptyString,

    #[envconfig(default = "IGO.CMO_LABEL_GENERATOR")]
    pub cmo_label_generator_topic: NonEmptyString,

    #[envconfig(default = "IGO.NEW_REQUEST")]
    pub new_request_topic: NonEmptyString,

    #[envconfig(default = "SERVER.REQUEST_UPDATE")]
    pub server_request_update_topic: NonEmptyString,

    #[envconfig(default = "IGO.CMO_LABEL_UPDATE")]
    pub cmo_label_update_topic: NonEmptyString,

    #[envconfig(default = "SERVER.SAMPLE_UPDATE")]
    pub server_sample_update_topic: NonEmptyString,

    #[envconfig(default = "IGO.CMO_PROMOTED_LABEL")]
    pub cmo_promoted_label_topic: NonEmptyString,

    #[envconfig(default = "IGO.PROMOTED_REQUEST")]
    pub promoted_request_topic: NonEmptyString,
}

impl TopicConfig {
    pub fn outbound(&self) -> OutboundTopics {
        OutboundTopics {
            cmo_label_generator: self.cmo_label_generator_topic.0.clone(),
            new_request: self.new_request_topic.0.clone(),
            server_request_update: self.server_request_update_topic.0.clone(),
            cmo_label_update: self.cmo_label_update_topic.0.clone(),
            server_sample_update: self.server_sample_update_topic.0.clone(),
            cmo_promoted_label: self.cmo_promoted_label_topic.0.clone(),
            promoted_request: self.promoted_request_topic.0.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
