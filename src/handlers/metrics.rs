use axum::http::{StatusCode, header};
use axum::response::IntoResponse;

use crate::error::ApiError;

pub async fn metrics_handler() -> Result<impl IntoResponse, ApiError> {
    let body = crate::metrics::render().map_err(ApiError::Internal)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
