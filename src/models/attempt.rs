// src/models/attempt.rs

use std::{
    collections::{BTreeMap, BTreeSet},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    error::AppError,
    models::exam::{Exam, SelectionMode},
};

/// Selected option ids keyed by question id.
pub type AnswerMap = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Submitted => "submitted",
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "submitted" => Ok(AttemptStatus::Submitted),
            other => Err(AppError::InternalConsistency(format!(
                "unknown attempt status '{}' in storage",
                other
            ))),
        }
    }
}

/// Identity of an attempt. Always built from the resolved principal,
/// never from client-supplied identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptKey {
    pub principal_id: String,
    pub exam_id: String,
}

impl AttemptKey {
    pub fn new(principal_id: impl Into<String>, exam_id: impl Into<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            exam_id: exam_id.into(),
        }
    }
}

/// Represents one principal's answer record for one exam
/// ('attempts' joined with 'attempt_answers').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub key: AttemptKey,
    pub status: AttemptStatus,
    pub answers: AnswerMap,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Attempt {
    /// A fresh, empty attempt at version 0.
    pub fn new(key: AttemptKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            status: AttemptStatus::InProgress,
            answers: AnswerMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            submitted_at: None,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.status == AttemptStatus::Submitted
    }

    /// Replaces the selection for one question. An empty set clears it.
    ///
    /// Returns `Ok(false)` when the selection is already in place, in which
    /// case neither the answers nor the version change.
    pub fn apply_selection(
        &mut self,
        question_id: &str,
        option_ids: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        if self.is_submitted() {
            return Err(AppError::AttemptLocked(format!(
                "Exam {} has already been submitted",
                self.key.exam_id
            )));
        }

        let current = self.answers.get(question_id);
        let unchanged = match current {
            Some(existing) => *existing == option_ids,
            None => option_ids.is_empty(),
        };
        if unchanged {
            return Ok(false);
        }

        if option_ids.is_empty() {
            self.answers.remove(question_id);
        } else {
            self.answers.insert(question_id.to_string(), option_ids);
        }
        self.version += 1;
        self.updated_at = now;
        Ok(true)
    }

    /// Freezes the attempt. Replays return the original result unchanged.
    pub fn submit(&mut self, now: DateTime<Utc>) -> SubmissionResult {
        if !self.is_submitted() {
            self.status = AttemptStatus::Submitted;
            self.version += 1;
            self.updated_at = now;
            self.submitted_at = Some(now);
        }
        SubmissionResult {
            exam_id: self.key.exam_id.clone(),
            submitted_at: self.submitted_at.unwrap_or(self.updated_at),
            version: self.version,
            answers: self.answers.clone(),
        }
    }

    /// The stored submission, if this attempt has been submitted.
    pub fn submission(&self) -> Option<SubmissionResult> {
        self.submitted_at.map(|submitted_at| SubmissionResult {
            exam_id: self.key.exam_id.clone(),
            submitted_at,
            version: self.version,
            answers: self.answers.clone(),
        })
    }

    pub fn snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot {
            exam_id: self.key.exam_id.clone(),
            status: self.status,
            version: self.version,
            answers: self.answers.clone(),
            updated_at: self.updated_at,
        }
    }

    /// Checks the answer mapping against the exam it belongs to:
    /// known questions only, known options only, single-select cardinality.
    pub fn verify_against(&self, exam: &Exam) -> Result<(), AppError> {
        for (question_id, option_ids) in &self.answers {
            let question = exam.question(question_id).ok_or_else(|| {
                AppError::InternalConsistency(format!(
                    "attempt references question {} outside exam {}",
                    question_id, exam.id
                ))
            })?;
            if let Some(stray) = option_ids.iter().find(|id| !question.has_option(id)) {
                return Err(AppError::InternalConsistency(format!(
                    "attempt references option {} outside question {}",
                    stray, question_id
                )));
            }
            if question.selection_mode == SelectionMode::SingleSelect
                && option_ids.len() > 1
            {
                return Err(AppError::InternalConsistency(format!(
                    "single-select question {} holds {} selections",
                    question_id,
                    option_ids.len()
                )));
            }
        }
        Ok(())
    }
}

/// What a student sees of their own attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSnapshot {
    pub exam_id: String,
    pub status: AttemptStatus,
    pub version: i64,
    pub answers: AnswerMap,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub exam_id: String,
    pub submitted_at: DateTime<Utc>,
    pub version: i64,
    pub answers: AnswerMap,
}

/// DTO for saving an answer selection.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SelectRequest {
    #[validate(length(min = 1, max = 64))]
    pub question_id: String,
    #[validate(length(max = 64))]
    pub option_ids: Vec<String>,
}
