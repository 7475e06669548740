// src/handlers/attempt.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    coordinator::Coordinator,
    error::AppError,
    models::{attempt::SelectRequest, principal::Principal},
};

/// Saves the caller's selected options for a question.
///
/// Clients on flaky connections call this on every change and may retry;
/// replaying the same selection is harmless.
pub async fn select_answer(
    State(coordinator): State<Arc<Coordinator>>,
    Extension(principal): Extension<Principal>,
    Path(exam_id): Path<String>,
    payload: Result<Json<SelectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let snapshot = coordinator.select(&principal, &exam_id, &payload).await?;
    Ok(Json(snapshot))
}

/// Returns the caller's saved answers and status, used to resume after
/// connectivity loss or on another device.
pub async fn get_state(
    State(coordinator): State<Arc<Coordinator>>,
    Extension(principal): Extension<Principal>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = coordinator.get_state(&principal, &exam_id).await?;
    Ok(Json(snapshot))
}

/// Submits the caller's attempt. After submission no further answers are accepted.
pub async fn submit_exam(
    State(coordinator): State<Arc<Coordinator>>,
    Extension(principal): Extension<Principal>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let result = coordinator.submit(&principal, &exam_id).await?;
    Ok(Json(result))
}
