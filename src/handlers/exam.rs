// src/handlers/exam.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::{
    coordinator::Coordinator,
    error::AppError,
    models::{exam::CreateExamRequest, principal::Principal},
};

/// Creates a new exam in Draft state.
/// The exam is not visible to students until it is activated.
pub async fn create_exam(
    State(coordinator): State<Arc<Coordinator>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<CreateExamRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    let exam = coordinator.create_exam(&principal, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": exam.id, "status": exam.status })),
    ))
}

/// Marks the given exam as active.
/// Only one exam is active at a time; see `ActivationPolicy` for what happens
/// to the current one.
pub async fn activate_exam(
    State(coordinator): State<Arc<Coordinator>>,
    Extension(principal): Extension<Principal>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let activation = coordinator.activate(&principal, &exam_id).await?;

    Ok(Json(json!({
        "status": "activated",
        "exam_id": activation.exam_id,
        "replaced": activation.replaced,
    })))
}

/// Closes the given exam. Closing an already closed exam succeeds.
pub async fn close_exam(
    State(coordinator): State<Arc<Coordinator>>,
    Extension(principal): Extension<Principal>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    coordinator.close(&principal, &exam_id).await?;

    Ok(Json(json!({ "status": "closed", "exam_id": exam_id })))
}

/// Returns the currently active exam, without the answer key for students.
pub async fn get_active_exam(
    State(coordinator): State<Arc<Coordinator>>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let exam = coordinator.get_active(&principal).await?;
    Ok(Json(exam))
}

/// Loads the full exam structure including all questions and options.
pub async fn get_exam(
    State(coordinator): State<Arc<Coordinator>>,
    Extension(principal): Extension<Principal>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let exam = coordinator.get_exam(&principal, &exam_id).await?;
    Ok(Json(exam))
}
