use axum::extract::{Path, State};
use axum::Json;
use tracing::debug;

use product_common::product::ProductRecord;

use super::{ApiError, AppState};

fn present(state: &AppState, record: ProductRecord) -> ProductRecord {
    match state.hide_status {
        true => record.without_status(),
        false => record,
    }
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ProductRecord>>, ApiError> {
    let records = state.store.list_all().await?;
    debug!(count = records.len(), "listing products");

    Ok(Json(
        records
            .into_iter()
            .map(|record| present(&state, record))
            .collect(),
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductRecord>, ApiError> {
    match state.store.get(&id).await? {
        Some(record) => Ok(Json(present(&state, record))),
        None => Err(ApiError::NotFound(id)),
    }
}
