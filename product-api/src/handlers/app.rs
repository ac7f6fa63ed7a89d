use std::sync::Arc;

use axum::{routing, Router};
use tower_http::trace::TraceLayer;

use product_common::metrics;
use product_common::prices::PriceUpdater;
use product_common::store::RecordStore;

use super::{prices, products};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore + Send + Sync>,
    pub prices: Arc<PriceUpdater>,
    /// Strip the outbox marker from read responses.
    pub hide_status: bool,
}

pub fn add_routes(router: Router, state: AppState) -> Router {
    let products = Router::new()
        .route("/products", routing::get(products::list))
        .route("/products/prices", routing::post(prices::post))
        .route("/products/:id", routing::get(products::get))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(metrics::track_metrics))
        .with_state(state);

    router.merge(products)
}
