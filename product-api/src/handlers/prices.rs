use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use tracing::debug;

use product_common::prices::PriceUpdateReport;
use product_common::product::PriceUpdateRequest;

use super::{ApiError, AppState};

/// Apply a batch of price corrections. Responds 200 once every correction was attempted,
/// with per-id outcomes in the body.
pub async fn post(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PriceUpdateReport>, ApiError> {
    let requests: Option<Vec<PriceUpdateRequest>> = match body.is_empty() {
        true => None,
        false => serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("malformed body: {}", e)))?,
    };
    debug!(count = requests.as_ref().map(Vec::len), "received price updates");

    let report = state.prices.run(requests).await?;
    metrics::counter!("product_price_update_requests_total").increment(1);

    Ok(Json(report))
}
