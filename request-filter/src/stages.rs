//! The per-kind parts of a pipeline: how to decode a payload and which checks to run on it.
use request_validator::{Record, RequestChecker};
use serde::Serialize;

use crate::codec::{decode_batch, decode_record};
use crate::error::DecodeError;
use crate::router::{MessageKind, Outcome};

pub trait Stage: Send + Sync + 'static {
    type Item: Serialize + Send + 'static;

    const KIND: MessageKind;

    fn decode(&self, payload: &[u8]) -> Result<Self::Item, DecodeError>;

    fn validate(&self, checker: &RequestChecker, item: Self::Item) -> Outcome;
}

/// New requests from the intake gateway.
pub struct NewRequestStage;

impl Stage for NewRequestStage {
    type Item = Record;
    const KIND: MessageKind = MessageKind::NewRequest;

    fn decode(&self, payload: &[u8]) -> Result<Record, DecodeError> {
        decode_record(payload)
    }

    fn validate(&self, checker: &RequestChecker, item: Record) -> Outcome {
        Outcome::NewRequest(checker.filter_valid_request(item))
    }
}

pub struct RequestUpdateStage;

impl Stage for RequestUpdateStage {
    type Item = Record;
    const KIND: MessageKind = MessageKind::RequestUpdate;

    fn decode(&self, payload: &[u8]) -> Result<Record, DecodeError> {
        decode_record(payload)
    }

    fn validate(&self, checker: &RequestChecker, item: Record) -> Outcome {
        Outcome::RequestUpdate(checker.validate_request_update(item))
    }
}

/// Sample updates arrive batched; each sample is classified on its own.
pub struct SampleUpdateStage;

impl Stage for SampleUpdateStage {
    type Item = Vec<Record>;
    const KIND: MessageKind = MessageKind::SampleUpdate;

    fn decode(&self, payload: &[u8]) -> Result<Vec<Record>, DecodeError> {
        decode_batch(payload)
    }

    fn validate(&self, checker: &RequestChecker, item: Vec<Record>) -> Outcome {
        Outcome::SampleUpdates(
            item.into_iter()
                .map(|sample| checker.validate_sample_update(sample))
                .collect(),
        )
    }
}

pub struct PromotedRequestStage;

impl Stage for PromotedRequestStage {
    type Item = Record;
    const KIND: MessageKind = MessageKind::PromotedRequest;

    fn decode(&self, payload: &[u8]) -> Result<Record, DecodeError> {
        decode_record(payload)
    }

    fn validate(&self, checker: &RequestChecker, item: Record) -> Outcome {
        Outcome::PromotedRequest(checker.validate_promoted_request(item))
    }
}
