// src/auth.rs

//! Principal resolution: bearer credential -> (principal id, role).

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        credential::{Credential, IssuedCredential},
        principal::{Principal, Role},
    },
    utils::{
        clock::now,
        jwt::{sign_jwt, verify_jwt},
    },
};

/// Maps an inbound credential to the principal behind it.
#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<Principal, AppError>;
}

/// Issues signed credentials and resolves them against the 'credentials' table.
///
/// A credential is only honoured while its row is active, so revocation applies
/// to the next request that presents it.
#[derive(Clone)]
pub struct TokenResolver {
    pool: SqlitePool,
    secret: String,
    expiration_seconds: u64,
}

impl TokenResolver {
    pub fn new(pool: SqlitePool, secret: impl Into<String>, expiration_seconds: u64) -> Self {
        Self {
            pool,
            secret: secret.into(),
            expiration_seconds,
        }
    }

    pub async fn issue(&self, principal_id: &str, role: Role) -> Result<IssuedCredential, AppError> {
        let jti = Uuid::new_v4().to_string();
        self.issue_with_jti(jti, principal_id, role).await
    }

    /// Issues a student credential for a named candidate. The principal id is
    /// the name plus a short suffix from the credential id, so two candidates
    /// with the same name stay distinct.
    pub async fn issue_candidate(&self, candidate_name: &str) -> Result<IssuedCredential, AppError> {
        let jti = Uuid::new_v4().to_string();
        let principal_id = format!("{}_{}", candidate_name, &jti[..6]);
        self.issue_with_jti(jti, &principal_id, Role::Student).await
    }

    async fn issue_with_jti(
        &self,
        jti: String,
        principal_id: &str,
        role: Role,
    ) -> Result<IssuedCredential, AppError> {
        let token = sign_jwt(
            principal_id,
            role.as_str(),
            &jti,
            &self.secret,
            self.expiration_seconds,
        )?;

        sqlx::query(
            r#"
            INSERT INTO credentials (jti, principal_id, role, active, created_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(jti.as_str())
        .bind(principal_id)
        .bind(role.as_str())
        .bind(now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to record credential: {:?}", e);
            AppError::from(e)
        })?;

        tracing::info!("Issued {} credential for {}", role, principal_id);

        Ok(IssuedCredential {
            token,
            jti,
            principal_id: principal_id.to_string(),
            role: role.as_str().to_string(),
        })
    }

    /// Marks a credential inactive. Revoking twice is not an error.
    pub async fn revoke(&self, jti: &str) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE credentials SET active = 0 WHERE jti = ?")
            .bind(jti)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Credential {} not found", jti)));
        }

        tracing::info!("Revoked credential {}", jti);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Credential>, AppError> {
        let credentials = sqlx::query_as::<_, Credential>(
            r#"
            SELECT jti, principal_id, role, active, created_at
            FROM credentials
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(credentials)
    }
}

#[async_trait]
impl PrincipalResolver for TokenResolver {
    async fn resolve(&self, credential: &str) -> Result<Principal, AppError> {
        let claims = verify_jwt(credential, &self.secret)?;

        let row = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT principal_id, role, active FROM credentials WHERE jti = ?",
        )
        .bind(claims.jti.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((principal_id, role, true)) if principal_id == claims.sub => {
                Ok(Principal::new(principal_id, role.parse()?))
            }
            Some((_, _, false)) => Err(AppError::Unauthorized(
                "Credential has been revoked".to_string(),
            )),
            _ => Err(AppError::Unauthorized("Unknown credential".to_string())),
        }
    }
}
