use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::health::HealthRegistry;
use crate::metrics;

/// Routes every product service exposes: index, probes and metrics.
/// Services merge their own routes into it.
pub fn service_router(
    name: &'static str,
    liveness: HealthRegistry,
    metrics: Option<PrometheusHandle>,
) -> Router {
    Router::new()
        .route("/", routing::get(move || std::future::ready(name)))
        .route("/_readiness", routing::get(move || std::future::ready(name)))
        .route(
            "/_liveness",
            routing::get(move || std::future::ready(liveness.get_status())),
        )
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => std::future::ready(recorder_handle.render()),
                None => std::future::ready("no metrics recorder installed".to_owned()),
            }),
        )
        .layer(axum::middleware::from_fn(metrics::track_metrics))
}
