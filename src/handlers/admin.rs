// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    auth::TokenResolver,
    error::AppError,
    models::credential::IssueCredentialRequest,
};

/// Issues a student credential for a candidate.
/// Admin only. The token is returned once and never stored.
pub async fn issue_credential(
    State(tokens): State<TokenResolver>,
    payload: Result<Json<IssueCredentialRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let issued = tokens.issue_candidate(&payload.candidate_name).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

/// Lists issued credentials (ids and status only).
/// Admin only.
pub async fn list_credentials(
    State(tokens): State<TokenResolver>,
) -> Result<impl IntoResponse, AppError> {
    let credentials = tokens.list().await?;
    Ok(Json(credentials))
}

/// Revokes a credential. Takes effect on its next request.
/// Admin only.
pub async fn revoke_credential(
    State(tokens): State<TokenResolver>,
    Path(jti): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    tokens.revoke(&jti).await?;
    Ok(Json(serde_json::json!({ "status": "revoked", "jti": jti })))
}
