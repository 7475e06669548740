// src/catalog.rs

//! Exam Catalog rules: turning an admin-supplied definition into a Draft exam,
//! and the `Draft -> Active -> Closed` lifecycle.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    error::AppError,
    models::exam::{
        CreateExamRequest, Exam, ExamOption, ExamStatus, Question, QuestionDefinition,
        SelectionMode,
    },
    utils::html::clean_html,
};

/// Validates a definition and builds the Draft exam it describes.
///
/// Rejected with `InvalidDefinition`:
/// * no questions, or a question without options;
/// * duplicate question ids, or duplicate option ids within a question;
/// * a correct answer that is not an option of its question;
/// * a single-select question without exactly one correct answer.
pub fn build_exam(
    id: String,
    definition: CreateExamRequest,
    created_by: &str,
    created_at: DateTime<Utc>,
) -> Result<Exam, AppError> {
    definition
        .validate()
        .map_err(|e| AppError::InvalidDefinition(e.to_string()))?;

    if definition.questions.is_empty() {
        return Err(AppError::InvalidDefinition(
            "An exam needs at least one question".to_string(),
        ));
    }

    let mut question_ids = HashSet::new();
    let mut questions = Vec::with_capacity(definition.questions.len());
    for question in definition.questions {
        if !question_ids.insert(question.id.clone()) {
            return Err(AppError::InvalidDefinition(format!(
                "Duplicate question id '{}'",
                question.id
            )));
        }
        questions.push(build_question(question)?);
    }

    let title = clean_html(&definition.title);
    if title.is_empty() {
        return Err(AppError::InvalidDefinition(
            "Title is empty after sanitization".to_string(),
        ));
    }

    Ok(Exam {
        id,
        title,
        status: ExamStatus::Draft,
        created_by: created_by.to_string(),
        created_at,
        questions,
    })
}

fn build_question(definition: QuestionDefinition) -> Result<Question, AppError> {
    let QuestionDefinition {
        id,
        prompt,
        selection_mode,
        options,
        correct_option_ids,
    } = definition;

    if options.is_empty() {
        return Err(AppError::InvalidDefinition(format!(
            "Question '{}' has no options",
            id
        )));
    }

    let mut option_ids = HashSet::new();
    for option in &options {
        if !option_ids.insert(option.id.as_str()) {
            return Err(AppError::InvalidDefinition(format!(
                "Duplicate option id '{}' in question '{}'",
                option.id, id
            )));
        }
    }

    let correct: BTreeSet<String> = correct_option_ids.into_iter().collect();
    if let Some(stray) = correct.iter().find(|c| !option_ids.contains(c.as_str())) {
        return Err(AppError::InvalidDefinition(format!(
            "Correct answer '{}' is not an option of question '{}'",
            stray, id
        )));
    }

    if selection_mode == SelectionMode::SingleSelect && correct.len() != 1 {
        return Err(AppError::InvalidDefinition(format!(
            "Single-select question '{}' must mark exactly one correct option, found {}",
            id,
            correct.len()
        )));
    }

    let prompt = clean_html(&prompt);
    if prompt.is_empty() {
        return Err(AppError::InvalidDefinition(format!(
            "Prompt of question '{}' is empty after sanitization",
            id
        )));
    }

    let options = options
        .into_iter()
        .map(|o| {
            let label = clean_html(&o.label);
            if label.is_empty() {
                return Err(AppError::InvalidDefinition(format!(
                    "Label of option '{}' in question '{}' is empty after sanitization",
                    o.id, id
                )));
            }
            Ok(ExamOption { id: o.id, label })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Question {
        prompt,
        selection_mode,
        options,
        correct_option_ids: correct,
        id,
    })
}

/// Checks that the selection names only options of `question_id` and respects
/// its cardinality. Returns the normalized option set.
pub fn validate_selection(
    exam: &Exam,
    question_id: &str,
    option_ids: &[String],
) -> Result<BTreeSet<String>, AppError> {
    let question = exam.question(question_id).ok_or_else(|| {
        AppError::UnknownQuestion(format!(
            "Question '{}' does not belong to exam {}",
            question_id, exam.id
        ))
    })?;

    let selection: BTreeSet<String> = option_ids.iter().cloned().collect();
    if let Some(stray) = selection.iter().find(|id| !question.has_option(id)) {
        return Err(AppError::InvalidOption(format!(
            "Option '{}' does not belong to question '{}'",
            stray, question_id
        )));
    }

    if question.selection_mode == SelectionMode::SingleSelect && selection.len() > 1 {
        return Err(AppError::TooManySelections(format!(
            "Question '{}' accepts a single option, got {}",
            question_id,
            selection.len()
        )));
    }

    Ok(selection)
}

/// The lifecycle only moves forward: `Draft -> Active -> Closed`, plus
/// `Draft -> Closed` for exams that are withdrawn before they run.
pub fn can_transition(from: ExamStatus, to: ExamStatus) -> bool {
    matches!(
        (from, to),
        (ExamStatus::Draft, ExamStatus::Active)
            | (ExamStatus::Draft, ExamStatus::Closed)
            | (ExamStatus::Active, ExamStatus::Closed)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam::OptionDefinition;
    use crate::utils::clock::now;

    fn option(id: &str) -> OptionDefinition {
        OptionDefinition {
            id: id.to_string(),
            label: format!("label {}", id),
        }
    }

    fn question(
        id: &str,
        mode: SelectionMode,
        options: &[&str],
        correct: &[&str],
    ) -> QuestionDefinition {
        QuestionDefinition {
            id: id.to_string(),
            prompt: format!("prompt {}", id),
            selection_mode: mode,
            options: options.iter().map(|o| option(o)).collect(),
            correct_option_ids: correct.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn definition(questions: Vec<QuestionDefinition>) -> CreateExamRequest {
        CreateExamRequest {
            title: "Sample Exam".to_string(),
            questions,
        }
    }

    fn build(questions: Vec<QuestionDefinition>) -> Result<Exam, AppError> {
        build_exam("e1".to_string(), definition(questions), "admin", now())
    }

    fn sample() -> Exam {
        build(vec![
            question("q1", SelectionMode::SingleSelect, &["o1", "o2"], &["o1"]),
            question("q2", SelectionMode::MultiSelect, &["o3", "o4", "o5"], &["o3", "o4"]),
        ])
        .unwrap()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_definition_builds_draft() {
        let exam = sample();
        assert_eq!(exam.status, ExamStatus::Draft);
        assert_eq!(exam.created_by, "admin");
        assert_eq!(exam.questions.len(), 2);
        assert_eq!(exam.questions[1].correct_option_ids.len(), 2);
    }

    #[test]
    fn test_question_without_options_is_invalid() {
        let err = build(vec![question("q1", SelectionMode::MultiSelect, &[], &[])]).unwrap_err();
        assert!(matches!(err, AppError::InvalidDefinition(_)));
    }

    #[test]
    fn test_single_select_needs_exactly_one_correct() {
        for correct in [&[][..], &["o1", "o2"][..]] {
            let err = build(vec![question(
                "q1",
                SelectionMode::SingleSelect,
                &["o1", "o2"],
                correct,
            )])
            .unwrap_err();
            assert!(matches!(err, AppError::InvalidDefinition(_)));
        }
    }

    #[test]
    fn test_multi_select_may_have_no_correct_option() {
        assert!(build(vec![question("q1", SelectionMode::MultiSelect, &["o1"], &[])]).is_ok());
    }

    #[test]
    fn test_correct_answer_must_be_an_option() {
        let err = build(vec![question(
            "q1",
            SelectionMode::SingleSelect,
            &["o1", "o2"],
            &["o9"],
        )])
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidDefinition(_)));
    }

    #[test]
    fn test_duplicate_ids_are_invalid() {
        let err = build(vec![
            question("q1", SelectionMode::MultiSelect, &["o1"], &[]),
            question("q1", SelectionMode::MultiSelect, &["o2"], &[]),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidDefinition(_)));

        let err = build(vec![question("q1", SelectionMode::MultiSelect, &["o1", "o1"], &[])])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidDefinition(_)));
    }

    #[test]
    fn test_empty_exam_and_bad_identifiers_are_invalid() {
        assert!(matches!(build(vec![]), Err(AppError::InvalidDefinition(_))));

        let err = build(vec![question("q 1", SelectionMode::MultiSelect, &["o1"], &[])])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidDefinition(_)));
    }

    #[test]
    fn test_text_is_sanitized() {
        let mut q = question("q1", SelectionMode::MultiSelect, &["o1"], &[]);
        q.prompt = "Pick one<script>alert(1)</script>".to_string();
        let exam = build(vec![q]).unwrap();
        assert_eq!(exam.questions[0].prompt, "Pick one");

        let mut q = question("q1", SelectionMode::MultiSelect, &["o1"], &[]);
        q.prompt = "<script>x</script>".to_string();
        assert!(matches!(build(vec![q]), Err(AppError::InvalidDefinition(_))));

        let mut q = question("q1", SelectionMode::MultiSelect, &["o1"], &[]);
        q.options[0].label = "<script>y</script>".to_string();
        assert!(matches!(build(vec![q]), Err(AppError::InvalidDefinition(_))));
    }

    #[test]
    fn test_selection_validation() {
        let exam = sample();

        assert_eq!(
            validate_selection(&exam, "q1", &ids(&["o1"])).unwrap(),
            BTreeSet::from(["o1".to_string()])
        );
        assert!(matches!(
            validate_selection(&exam, "q9", &ids(&["o1"])),
            Err(AppError::UnknownQuestion(_))
        ));
        // o3 exists, but under q2.
        assert!(matches!(
            validate_selection(&exam, "q1", &ids(&["o3"])),
            Err(AppError::InvalidOption(_))
        ));
        assert!(matches!(
            validate_selection(&exam, "q1", &ids(&["o1", "o2"])),
            Err(AppError::TooManySelections(_))
        ));
        // A repeated id is still one selection.
        assert!(validate_selection(&exam, "q1", &ids(&["o2", "o2"])).is_ok());
        assert_eq!(
            validate_selection(&exam, "q2", &ids(&["o4", "o3"])).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_lifecycle_only_moves_forward() {
        use ExamStatus::*;
        assert!(can_transition(Draft, Active));
        assert!(can_transition(Active, Closed));
        assert!(can_transition(Draft, Closed));
        assert!(!can_transition(Active, Draft));
        assert!(!can_transition(Closed, Active));
        assert!(!can_transition(Closed, Draft));
        assert!(!can_transition(Active, Active));
    }
}
