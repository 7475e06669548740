// src/models/credential.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::exam::IDENTIFIER;

/// Represents the 'credentials' table. The token itself is never stored;
/// only its `jti` claim, which is what revocation targets.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Credential {
    pub jti: String,
    pub principal_id: String,
    pub role: String,
    pub active: bool,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// Represents the 'users' table (admin accounts).
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Argon2 password hash.
    pub password: String,
    pub role: String,
}

/// DTO for admin login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 50))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for issuing a candidate credential.
#[derive(Debug, Deserialize, Validate)]
pub struct IssueCredentialRequest {
    #[validate(regex(path = *IDENTIFIER, message = "Candidate name must match [A-Za-z0-9_.-]{1,64}"))]
    pub candidate_name: String,
}

/// Returned once, at issuance. The token cannot be recovered afterwards.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub token: String,
    pub jti: String,
    pub principal_id: String,
    pub role: String,
}
