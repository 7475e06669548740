// src/store/sqlite.rs

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool, types::Json};

use crate::{
    error::AppError,
    models::{
        attempt::{AnswerMap, Attempt, AttemptKey},
        exam::{Exam, ExamStatus, Question},
    },
    store::{AttemptStore, ExamStore},
    utils::clock::from_millis,
};

/// SQLite-backed implementation of both store traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Helper struct for fetching a row of the 'exams' table.
#[derive(FromRow)]
struct ExamRow {
    id: String,
    title: String,
    status: String,
    created_by: String,
    created_at: i64,
    questions: Json<Vec<Question>>,
}

impl TryFrom<ExamRow> for Exam {
    type Error = AppError;

    fn try_from(row: ExamRow) -> Result<Self, Self::Error> {
        Ok(Exam {
            id: row.id,
            title: row.title,
            status: row.status.parse()?,
            created_by: row.created_by,
            created_at: from_millis(row.created_at)?,
            questions: row.questions.0,
        })
    }
}

/// Helper struct for fetching a row of the 'attempts' table.
#[derive(FromRow)]
struct AttemptRow {
    status: String,
    version: i64,
    created_at: i64,
    updated_at: i64,
    submitted_at: Option<i64>,
}

#[async_trait]
impl ExamStore for SqliteStore {
    async fn insert_exam(&self, exam: &Exam) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO exams (id, title, status, created_by, created_at, questions)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(exam.id.as_str())
        .bind(exam.title.as_str())
        .bind(exam.status.as_str())
        .bind(exam.created_by.as_str())
        .bind(exam.created_at.timestamp_millis())
        .bind(Json(&exam.questions))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert exam {}: {:?}", exam.id, e);
            AppError::from(e)
        })?;

        Ok(())
    }

    async fn find_exam(&self, exam_id: &str) -> Result<Option<Exam>, AppError> {
        let row = sqlx::query_as::<_, ExamRow>(
            r#"
            SELECT id, title, status, created_by, created_at, questions
            FROM exams
            WHERE id = ?
            "#,
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Exam::try_from).transpose()
    }

    async fn active_exam_ids(&self) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id FROM exams WHERE status = 'active' ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn set_statuses(&self, changes: &[(String, ExamStatus)]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        for (exam_id, status) in changes {
            let result = sqlx::query("UPDATE exams SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(exam_id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    // The partial unique index on active exams.
                    if e.to_string().contains("exams.status") {
                        AppError::AlreadyActive("Another exam is already active".to_string())
                    } else {
                        tracing::error!("Failed to update status of exam {}: {:?}", exam_id, e);
                        AppError::from(e)
                    }
                })?;

            if result.rows_affected() != 1 {
                return Err(AppError::NotFound(format!("Exam {} not found", exam_id)));
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for SqliteStore {
    async fn find_attempt(&self, key: &AttemptKey) -> Result<Option<Attempt>, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT status, version, created_at, updated_at, submitted_at
            FROM attempts
            WHERE exam_id = ? AND principal_id = ?
            "#,
        )
        .bind(key.exam_id.as_str())
        .bind(key.principal_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let pairs = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT question_id, option_id
            FROM attempt_answers
            WHERE exam_id = ? AND principal_id = ?
            "#,
        )
        .bind(key.exam_id.as_str())
        .bind(key.principal_id.as_str())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut answers = AnswerMap::new();
        for (question_id, option_id) in pairs {
            answers.entry(question_id).or_default().insert(option_id);
        }

        Ok(Some(Attempt {
            key: key.clone(),
            status: row.status.parse()?,
            answers,
            version: row.version,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            submitted_at: row.submitted_at.map(from_millis).transpose()?,
        }))
    }

    async fn save_attempt(&self, attempt: &Attempt) -> Result<(), AppError> {
        let key = &attempt.key;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO attempts
                (exam_id, principal_id, status, version, created_at, updated_at, submitted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (exam_id, principal_id) DO UPDATE SET
                status = excluded.status,
                version = excluded.version,
                updated_at = excluded.updated_at,
                submitted_at = excluded.submitted_at
            "#,
        )
        .bind(key.exam_id.as_str())
        .bind(key.principal_id.as_str())
        .bind(attempt.status.as_str())
        .bind(attempt.version)
        .bind(attempt.created_at.timestamp_millis())
        .bind(attempt.updated_at.timestamp_millis())
        .bind(attempt.submitted_at.map(|t| t.timestamp_millis()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM attempt_answers WHERE exam_id = ? AND principal_id = ?")
            .bind(key.exam_id.as_str())
            .bind(key.principal_id.as_str())
            .execute(&mut *tx)
            .await?;

        for (question_id, option_ids) in &attempt.answers {
            for option_id in option_ids {
                sqlx::query(
                    r#"
                    INSERT INTO attempt_answers (exam_id, principal_id, question_id, option_id)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(key.exam_id.as_str())
                .bind(key.principal_id.as_str())
                .bind(question_id.as_str())
                .bind(option_id.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await.map_err(|e| {
            tracing::error!(
                "Failed to commit attempt {}/{}: {:?}",
                key.exam_id,
                key.principal_id,
                e
            );
            AppError::from(e)
        })?;

        Ok(())
    }
}
