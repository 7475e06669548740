// src/coordinator.rs

//! The Attempt Coordinator: the only component that mutates exam status or
//! attempts.
//!
//! Locking, outermost first:
//!
//! 1. `lifecycle` - serializes create/activate/close against each other.
//! 2. `exam_gates` - one `RwLock` per exam. Attempt operations hold it shared,
//!    status transitions hold it exclusively for the exams they touch, so a
//!    select or submit never straddles a transition of its own exam while
//!    attempts on other exams proceed untouched.
//! 3. `attempt_locks` - one `Mutex` per (principal, exam). Every read-modify-write
//!    of an attempt runs under it, which totally orders selects and submits on
//!    the same attempt and never blocks other principals.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    catalog,
    config::ActivationPolicy,
    error::AppError,
    models::{
        attempt::{Attempt, AttemptKey, AttemptSnapshot, SelectRequest, SubmissionResult},
        exam::{CreateExamRequest, Exam, ExamStatus, ExamView},
        principal::Principal,
    },
    store::{AttemptStore, ExamStore},
    utils::{clock::now, locks::LockTable},
};

/// Idle lock slots are dropped once a table grows past this many entries.
const LOCK_TABLE_PRUNE_THRESHOLD: usize = 4096;

/// Result of a successful activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub exam_id: String,
    /// Exam closed to make room, under [`ActivationPolicy::Replace`].
    pub replaced: Option<String>,
}

pub struct Coordinator {
    exams: Arc<dyn ExamStore>,
    attempts: Arc<dyn AttemptStore>,
    policy: ActivationPolicy,
    lifecycle: Mutex<()>,
    exam_gates: LockTable<String, RwLock<()>>,
    attempt_locks: LockTable<AttemptKey, Mutex<()>>,
}

impl Coordinator {
    pub fn new(
        exams: Arc<dyn ExamStore>,
        attempts: Arc<dyn AttemptStore>,
        policy: ActivationPolicy,
    ) -> Self {
        Self {
            exams,
            attempts,
            policy,
            lifecycle: Mutex::new(()),
            exam_gates: LockTable::new(),
            attempt_locks: LockTable::new(),
        }
    }

    pub fn policy(&self) -> ActivationPolicy {
        self.policy
    }

    // ---------------- Exam lifecycle ----------------

    /// Stores a new exam in Draft. Admin only.
    pub async fn create_exam(
        &self,
        principal: &Principal,
        definition: CreateExamRequest,
    ) -> Result<Exam, AppError> {
        let admin = principal.require_admin()?;
        let exam = catalog::build_exam(Uuid::new_v4().to_string(), definition, &admin.id, now())?;

        let _lifecycle = self.lifecycle.lock().await;
        self.exams.insert_exam(&exam).await?;

        tracing::info!("Exam {} created by {}", exam.id, admin.id);
        Ok(exam)
    }

    /// Moves a Draft exam to Active, enforcing the single-active-exam rule
    /// according to the configured [`ActivationPolicy`]. Admin only.
    ///
    /// Activating the exam that is already Active is a no-op.
    pub async fn activate(&self, principal: &Principal, exam_id: &str) -> Result<Activation, AppError> {
        let admin = principal.require_admin()?;
        let _lifecycle = self.lifecycle.lock().await;

        let exam = self.find_exam(exam_id).await?;
        match exam.status {
            ExamStatus::Active => {
                return Ok(Activation {
                    exam_id: exam.id,
                    replaced: None,
                });
            }
            ExamStatus::Closed => {
                return Err(AppError::InvalidTransition(format!(
                    "Exam {} is closed and cannot be activated",
                    exam_id
                )));
            }
            ExamStatus::Draft => {}
        }

        let active = self.exams.active_exam_ids().await?;
        let replaced = match (active.as_slice(), self.policy) {
            ([], _) => None,
            ([current], ActivationPolicy::Reject) => {
                return Err(AppError::AlreadyActive(format!(
                    "Exam {} is already active; close it first",
                    current
                )));
            }
            ([current], ActivationPolicy::Replace) => Some(current.clone()),
            (many, _) => {
                return Err(AppError::InternalConsistency(format!(
                    "{} exams are active at once: {}",
                    many.len(),
                    many.join(", ")
                )));
            }
        };

        // Closing first keeps the single-active invariant true after every statement.
        let mut changes = Vec::with_capacity(2);
        if let Some(current) = &replaced {
            changes.push((current.clone(), ExamStatus::Closed));
        }
        changes.push((exam.id.clone(), ExamStatus::Active));

        let _gates = self.lock_exams_exclusive(&changes).await;
        self.exams.set_statuses(&changes).await?;

        match &replaced {
            Some(current) => tracing::info!(
                "Exam {} activated by {}, replacing {}",
                exam.id,
                admin.id,
                current
            ),
            None => tracing::info!("Exam {} activated by {}", exam.id, admin.id),
        }

        Ok(Activation {
            exam_id: exam.id,
            replaced,
        })
    }

    /// Moves a Draft or Active exam to Closed. Closing a Closed exam is a no-op.
    /// Admin only.
    pub async fn close(&self, principal: &Principal, exam_id: &str) -> Result<(), AppError> {
        let admin = principal.require_admin()?;
        let _lifecycle = self.lifecycle.lock().await;

        let exam = self.find_exam(exam_id).await?;
        if exam.status == ExamStatus::Closed {
            return Ok(());
        }
        if !catalog::can_transition(exam.status, ExamStatus::Closed) {
            return Err(AppError::InvalidTransition(format!(
                "Exam {} cannot move from {} to closed",
                exam_id, exam.status
            )));
        }

        let changes = [(exam.id.clone(), ExamStatus::Closed)];
        let _gates = self.lock_exams_exclusive(&changes).await;
        self.exams.set_statuses(&changes).await?;

        tracing::info!("Exam {} closed by {}", exam.id, admin.id);
        Ok(())
    }

    /// The single Active exam. Fails closed if storage ever reports more than one.
    pub async fn get_active(&self, principal: &Principal) -> Result<ExamView, AppError> {
        let active = self.exams.active_exam_ids().await?;
        let exam_id = match active.as_slice() {
            [] => return Err(AppError::NotFound("No active exam".to_string())),
            [only] => only,
            many => {
                return Err(AppError::InternalConsistency(format!(
                    "{} exams are active at once: {}",
                    many.len(),
                    many.join(", ")
                )));
            }
        };

        let exam = self.find_exam(exam_id).await?;
        Ok(Self::view_for(principal, exam))
    }

    /// Full exam content. Students never see the answer key and never see Drafts.
    pub async fn get_exam(&self, principal: &Principal, exam_id: &str) -> Result<ExamView, AppError> {
        let exam = self.find_exam(exam_id).await?;
        if !principal.is_admin() && exam.status == ExamStatus::Draft {
            return Err(AppError::NotFound(format!("Exam {} not found", exam_id)));
        }
        Ok(Self::view_for(principal, exam))
    }

    // ---------------- Attempts ----------------

    /// Replaces the caller's selection for one question, creating the attempt
    /// on first use. Replaying an identical selection returns the same snapshot
    /// without bumping the version.
    pub async fn select(
        &self,
        principal: &Principal,
        exam_id: &str,
        request: &SelectRequest,
    ) -> Result<AttemptSnapshot, AppError> {
        let student = principal.require_student()?;
        self.prune_idle_locks();

        let _gate = self.exam_gates.slot(&exam_id.to_string()).read_owned().await;
        let exam = self.find_active_exam(exam_id).await?;
        let selection = catalog::validate_selection(&exam, &request.question_id, &request.option_ids)?;

        let key = AttemptKey::new(student.id.as_str(), exam.id.as_str());
        let _attempt_guard = self.attempt_locks.slot(&key).lock_owned().await;

        let stored = self.attempts.find_attempt(&key).await?;
        let created = stored.is_none();
        let now = now();
        let mut attempt = stored.unwrap_or_else(|| Attempt::new(key.clone(), now));

        let changed = attempt.apply_selection(&request.question_id, selection, now)?;
        if changed || created {
            attempt.verify_against(&exam)?;
            self.attempts.save_attempt(&attempt).await?;
            tracing::debug!(
                "Attempt {}/{} at version {} after selecting {}",
                key.exam_id,
                key.principal_id,
                attempt.version,
                request.question_id
            );
        }

        Ok(attempt.snapshot())
    }

    /// The caller's own attempt. The lookup key comes from the resolved
    /// principal only.
    pub async fn get_state(&self, principal: &Principal, exam_id: &str) -> Result<AttemptSnapshot, AppError> {
        let student = principal.require_student()?;
        self.prune_idle_locks();
        let key = AttemptKey::new(student.id.as_str(), exam_id);

        let _attempt_guard = self.attempt_locks.slot(&key).lock_owned().await;
        let attempt = self
            .attempts
            .find_attempt(&key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No attempt for exam {}", exam_id)))?;

        Ok(attempt.snapshot())
    }

    /// Freezes the caller's attempt. A replay returns the original result, even
    /// if the exam has been closed since.
    pub async fn submit(&self, principal: &Principal, exam_id: &str) -> Result<SubmissionResult, AppError> {
        let student = principal.require_student()?;
        self.prune_idle_locks();

        let _gate = self.exam_gates.slot(&exam_id.to_string()).read_owned().await;
        let key = AttemptKey::new(student.id.as_str(), exam_id);
        let _attempt_guard = self.attempt_locks.slot(&key).lock_owned().await;

        let stored = self.attempts.find_attempt(&key).await?;
        if let Some(result) = stored.as_ref().and_then(Attempt::submission) {
            return Ok(result);
        }

        let exam = self.find_active_exam(exam_id).await?;
        let mut attempt = stored
            .ok_or_else(|| AppError::NotFound(format!("No attempt for exam {}", exam_id)))?;

        attempt.verify_against(&exam)?;
        let result = attempt.submit(now());
        self.attempts.save_attempt(&attempt).await?;

        tracing::info!(
            "Attempt {}/{} submitted at version {}",
            key.exam_id,
            key.principal_id,
            result.version
        );
        Ok(result)
    }

    // ---------------- Helpers ----------------

    async fn find_exam(&self, exam_id: &str) -> Result<Exam, AppError> {
        self.exams
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Exam {} not found", exam_id)))
    }

    async fn find_active_exam(&self, exam_id: &str) -> Result<Exam, AppError> {
        match self.exams.find_exam(exam_id).await? {
            Some(exam) if exam.is_active() => Ok(exam),
            Some(exam) => Err(AppError::ExamNotActive(format!(
                "Exam {} is {}",
                exam_id, exam.status
            ))),
            None => Err(AppError::ExamNotActive(format!(
                "Exam {} is not active",
                exam_id
            ))),
        }
    }

    /// Takes the gates of every exam in `changes` exclusively, in id order.
    async fn lock_exams_exclusive(
        &self,
        changes: &[(String, ExamStatus)],
    ) -> Vec<tokio::sync::OwnedRwLockWriteGuard<()>> {
        let mut ids: Vec<&String> = changes.iter().map(|(id, _)| id).collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.exam_gates.slot(id).write_owned().await);
        }
        guards
    }

    fn prune_idle_locks(&self) {
        if self.attempt_locks.len() > LOCK_TABLE_PRUNE_THRESHOLD {
            self.attempt_locks.prune();
        }
        if self.exam_gates.len() > LOCK_TABLE_PRUNE_THRESHOLD {
            self.exam_gates.prune();
        }
    }

    fn view_for(principal: &Principal, exam: Exam) -> ExamView {
        if principal.is_admin() {
            ExamView::Full(exam)
        } else {
            ExamView::Public(exam.to_public())
        }
    }
}
