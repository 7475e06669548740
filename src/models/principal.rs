// src/models/principal.rs

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "student" => Ok(Role::Student),
            other => Err(AppError::InternalConsistency(format!(
                "unknown role '{}'",
                other
            ))),
        }
    }
}

/// The resolved identity behind a request credential.
/// Injected into request extensions by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Capability check for catalog management.
    pub fn require_admin(&self) -> Result<&Self, AppError> {
        match self.role {
            Role::Admin => Ok(self),
            Role::Student => Err(AppError::Forbidden("Admin role required".to_string())),
        }
    }

    /// Capability check for holding attempts.
    pub fn require_student(&self) -> Result<&Self, AppError> {
        match self.role {
            Role::Student => Ok(self),
            Role::Admin => Err(AppError::Forbidden(
                "Only students can take exams".to_string(),
            )),
        }
    }
}
