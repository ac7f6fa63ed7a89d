use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use product_common::prices::FieldUpdateError;
use product_common::store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("product {0} not found")]
    NotFound(String),
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
}

impl From<FieldUpdateError> for ApiError {
    fn from(error: FieldUpdateError) -> Self {
        match error {
            FieldUpdateError::InvalidRequest(reason) => ApiError::InvalidRequest(reason),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(ref e) => {
                error!("record store error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
