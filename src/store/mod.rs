// src/store/mod.rs

//! Transactional persistence behind the coordinator.
//!
//! The coordinator only talks to the [`ExamStore`] and [`AttemptStore`] traits;
//! the process entry point decides which implementation backs them.

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::{
    config::Config,
    error::AppError,
    models::{
        attempt::{Attempt, AttemptKey},
        exam::{Exam, ExamStatus},
    },
};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Exam definitions and lifecycle status.
#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn insert_exam(&self, exam: &Exam) -> Result<(), AppError>;

    async fn find_exam(&self, exam_id: &str) -> Result<Option<Exam>, AppError>;

    /// Ids of every exam currently marked Active, sorted.
    async fn active_exam_ids(&self) -> Result<Vec<String>, AppError>;

    /// Applies all status changes in order, in one transaction.
    async fn set_statuses(&self, changes: &[(String, ExamStatus)]) -> Result<(), AppError>;
}

/// Per-(principal, exam) answer records.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Reads the attempt and its whole answer mapping as one consistent snapshot.
    async fn find_attempt(&self, key: &AttemptKey) -> Result<Option<Attempt>, AppError>;

    /// Replaces the stored attempt (status, version, timestamps, answers) atomically.
    async fn save_attempt(&self, attempt: &Attempt) -> Result<(), AppError>;
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Opens the SQLite pool described by the configuration.
///
/// An in-memory database lives only as long as its single connection, so the
/// pool is pinned to one connection that never expires.
pub async fn connect(config: &Config) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool_options = if is_in_memory(&config.database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.db_max_connections.max(1))
    };

    pool_options
        .acquire_timeout(Duration::from_secs(3))
        .connect_with(options)
        .await
}

/// Applies the embedded schema migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
