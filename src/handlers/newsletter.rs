use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::{SubscribeRequest, SubscribeResponse, normalize_email};
use crate::state::AppState;

// Subscribing twice is not an error, the second call just reports it
pub async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubscribeResponse>), ApiError> {
    let Json(payload) = payload?;

    let email = normalize_email(&payload.email)?;

    match state.subscribers.entry(email) {
        Entry::Occupied(_) => Ok((
            StatusCode::OK,
            Json(SubscribeResponse {
                subscribed: true,
                already_subscribed: true,
            }),
        )),
        Entry::Vacant(slot) => {
            slot.insert(state.limiter.clock().now());
            tracing::info!(subscribers = state.subscribers.len(), "New newsletter subscriber");
            Ok((
                StatusCode::CREATED,
                Json(SubscribeResponse {
                    subscribed: true,
                    already_subscribed: false,
                }),
            ))
        }
    }
}
