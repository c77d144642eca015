use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

/// Health reporting for the long-running loops of the service.
///
/// Every pipeline runs a pool of workers, and the process is only trustworthy when each of
/// them keeps polling its queue. A component registers once, then its handle is cloned into
/// every worker, which reports on each poll.
///
/// The process status is the combination of the components:
///   - if any component is unhealthy or stopped, the process is unhealthy
///   - if a component missed its deadline, it is stalled and the process is unhealthy
///   - otherwise the process is healthy, as long as at least one component registered
///
/// Liveness and readiness answer different questions, so each probe gets its own registry.
#[derive(Default, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set on registration
    Starting,
    /// Healthy until the deadline, must report again before it
    HealthyUntil(OffsetDateTime),
    /// Healthy with no deadline, for one-off transitions such as readiness
    Ready,
    Unhealthy,
    /// Set by the registry when a HealthyUntil deadline has passed
    Stalled,
    /// The component shut down on purpose
    Stopped,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Must be called more frequently than the registered deadline.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                _ = components.insert(self.component.clone(), status);
            }
            // The probes will fail and the process restart
            Err(_) => warn!("poisoned HealthRegistry lock"),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a component in `Starting`. The returned handle is cheap to clone.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.into(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Returns the overall process status. Can be used as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("{} health check failed: poisoned lock", self.name);
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let mut result = HealthStatus {
            // Unhealthy until something registers
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };
        for (name, status) in components.iter() {
            let status = match status {
                ComponentStatus::HealthyUntil(until) if *until <= now => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(
                status,
                ComponentStatus::HealthyUntil(_) | ComponentStatus::Ready
            ) {
                result.healthy = false;
            }
            _ = result.components.insert(name.clone(), status);
        }

        match result.healthy {
            true => debug!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, result.components),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Sub;

    #[test]
    fn defaults_to_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn one_component() {
        let registry = HealthRegistry::new("liveness");

        let handle = registry.register("request_filter", Duration::seconds(30));
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("request_filter"),
            Some(&ComponentStatus::Starting)
        );

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        handle.report_status(ComponentStatus::Unhealthy);
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("request_filter"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[test]
    fn staleness_check() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("request_filter", Duration::seconds(30));

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        // FIXME: we should mock the time instead
        handle.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().sub(Duration::seconds(1)),
        ));
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("request_filter"),
            Some(&ComponentStatus::Stalled)
        );
    }

    #[test]
    fn cloned_handles_share_a_component() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("promoted_request", Duration::seconds(30));
        let worker_handle = handle.clone();

        worker_handle.report_healthy();
        assert!(registry.get_status().healthy);
        assert_eq!(registry.get_status().components.len(), 1);
    }

    #[test]
    fn readiness_components() {
        let registry = HealthRegistry::new("readiness");
        let one = registry.register("request_filter", Duration::ZERO);
        let two = registry.register("request_update", Duration::ZERO);

        one.report_status(ComponentStatus::Ready);
        assert!(!registry.get_status().healthy);

        two.report_status(ComponentStatus::Ready);
        assert!(registry.get_status().healthy);

        two.report_status(ComponentStatus::Stopped);
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn into_response() {
        let nok = HealthStatus::default().into_response();
        assert_eq!(nok.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = HealthStatus {
            healthy: true,
            components: Default::default(),
        }
        .into_response();
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
