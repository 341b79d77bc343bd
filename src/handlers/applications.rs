use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::{ApplicationCreated, ApplicationRequest};
use crate::state::AppState;

pub async fn submit_application_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ApplicationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApplicationCreated>), ApiError> {
    let Json(payload) = payload?;

    let now = state.limiter.clock().now();
    let record = payload.into_record(now)?;
    // ids are only handed out to valid applications
    let id = state.next_application_id();

    tracing::info!(id, subteam = %record.subteam, "Application received");
    state.applications.insert(id, record);

    Ok((StatusCode::CREATED, Json(ApplicationCreated { id })))
}
