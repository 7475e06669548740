// src/models/exam.rs

use std::{
    collections::BTreeSet,
    fmt,
    str::FromStr,
    sync::LazyLock,
};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// Identifiers supplied by admins for questions and options.
pub static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,64}$").expect("identifier regex is valid"));

/// Lifecycle status of an exam: `Draft -> Active -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamStatus {
    Draft,
    Active,
    Closed,
}

impl ExamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamStatus::Draft => "draft",
            ExamStatus::Active => "active",
            ExamStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ExamStatus::Draft),
            "active" => Ok(ExamStatus::Active),
            "closed" => Ok(ExamStatus::Closed),
            other => Err(AppError::InternalConsistency(format!(
                "unknown exam status '{}' in storage",
                other
            ))),
        }
    }
}

/// Per-question cardinality constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    SingleSelect,
    MultiSelect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamOption {
    pub id: String,
    pub label: String,
}

/// A question as stored in the catalog, answer key included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub selection_mode: SelectionMode,
    pub options: Vec<ExamOption>,
    pub correct_option_ids: BTreeSet<String>,
}

impl Question {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// Represents a row of the 'exams' table with its questions decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exam {
    pub id: String,
    pub title: String,
    pub status: ExamStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub questions: Vec<Question>,
}

impl Exam {
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn is_active(&self) -> bool {
        self.status == ExamStatus::Active
    }

    /// Strips the answer key.
    pub fn to_public(&self) -> PublicExam {
        PublicExam {
            id: self.id.clone(),
            title: self.title.clone(),
            status: self.status,
            questions: self
                .questions
                .iter()
                .map(|q| PublicQuestion {
                    id: q.id.clone(),
                    prompt: q.prompt.clone(),
                    selection_mode: q.selection_mode,
                    options: q.options.clone(),
                })
                .collect(),
        }
    }
}

/// DTO for sending a question to students (excludes the correct answers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: String,
    pub prompt: String,
    pub selection_mode: SelectionMode,
    pub options: Vec<ExamOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicExam {
    pub id: String,
    pub title: String,
    pub status: ExamStatus,
    pub questions: Vec<PublicQuestion>,
}

/// What a caller gets back when reading an exam: admins see the answer key.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExamView {
    Full(Exam),
    Public(PublicExam),
}

/// DTO for creating a new exam.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(nested)]
    pub questions: Vec<QuestionDefinition>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QuestionDefinition {
    #[validate(regex(path = *IDENTIFIER))]
    pub id: String,
    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,
    pub selection_mode: SelectionMode,
    #[validate(nested)]
    pub options: Vec<OptionDefinition>,
    #[serde(default)]
    pub correct_option_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OptionDefinition {
    #[validate(regex(path = *IDENTIFIER))]
    pub id: String,
    #[validate(length(min = 1, max = 500))]
    pub label: String,
}
