pub mod audit;
pub mod health;
pub mod metrics;
pub mod transport;
