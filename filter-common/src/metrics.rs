use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::health::HealthRegistry;

/// Bind a `TcpListener` on `bind` and serve `router` until the listener fails.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Routes for the ops port: prometheus scrape plus the two probes.
pub fn setup_ops_router(
    recorder: PrometheusHandle,
    liveness: HealthRegistry,
    readiness: HealthRegistry,
) -> Router {
    Router::new()
        .route("/", get(index))
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        )
        .route(
            "/_readiness",
            get(move || std::future::ready(readiness.get_status())),
        )
        .route(
            "/metrics",
            get(move || std::future::ready(recorder.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

pub async fn index() -> &'static str {
    "request filter"
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

/// Middleware to record some common HTTP metrics on the ops port
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };

    let response = next.run(req).await;

    let labels = [
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!("ops_requests_total", &labels).increment(1);
    metrics::histogram!("ops_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
