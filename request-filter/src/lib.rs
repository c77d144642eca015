//! Validates lab request and sample metadata off the intake topics and routes it downstream.
pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod router;
pub mod service;
pub mod stages;
