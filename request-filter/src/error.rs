use filter_common::transport::TransportError;
use thiserror::Error;

/// Enumeration of reasons an inbound payload never made it into a queue.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected {expected}, got {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },
}

/// Enumeration of pipeline lifecycle errors. These are programming errors on the caller's side,
/// except for `Transport` which wraps a failed subscription.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0} pipeline is not initialized")]
    NotInitialized(&'static str),
    #[error("{0} pipeline is already initialized")]
    AlreadyInitialized(&'static str),
    #[error("{0} pipeline is not accepting messages")]
    NotAccepting(&'static str),
    #[error("{0} queue closed unexpectedly")]
    QueueClosed(&'static str),
    #[error("failed to subscribe: {0}")]
    Transport(#[from] TransportError),
}
