// src/handlers/auth.rs

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    auth::TokenResolver,
    error::AppError,
    models::{credential::LoginRequest, credential::User, principal::Role},
    utils::hash::verify_password,
};

/// Authenticates an admin account and returns a bearer credential.
///
/// Verifies the username and password against the 'users' table, then issues
/// a credential recorded in 'credentials' so it can be revoked later.
pub async fn login(
    State(pool): State<SqlitePool>,
    State(tokens): State<TokenResolver>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload?;
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, password, role
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(payload.username.as_str())
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Login DB error: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    // Same message for unknown user and wrong password.
    let user = user.ok_or(AppError::Unauthorized("Invalid credentials".to_string()))?;

    if !verify_password(&payload.password, &user.password)? {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    let role: Role = user.role.parse()?;
    let issued = tokens.issue(&user.username, role).await?;
    tracing::info!("User {} (id {}) logged in", user.username, user.id);

    Ok(Json(serde_json::json!({
        "token": issued.token,
        "type": "Bearer",
        "role": issued.role,
    })))
}
