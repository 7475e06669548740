// tests/coordinator_tests.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use exam_service::{
    Coordinator,
    config::{ActivationPolicy, Config},
    error::AppError,
    models::{
        attempt::{AttemptStatus, SelectRequest},
        exam::{CreateExamRequest, Exam, ExamStatus, ExamView},
        principal::{Principal, Role},
    },
    store::{self, ExamStore, SqliteStore},
};
use serde_json::json;

/// Helper function to build a coordinator over a fresh in-memory database.
async fn setup(policy: ActivationPolicy) -> Arc<Coordinator> {
    let pool = store::connect(&Config::for_tests(policy))
        .await
        .expect("Failed to open in-memory database");
    store::migrate(&pool)
        .await
        .expect("Failed to migrate database");

    let store = Arc::new(SqliteStore::new(pool));
    Arc::new(Coordinator::new(store.clone(), store, policy))
}

fn admin() -> Principal {
    Principal::new("root", Role::Admin)
}

fn student(name: &str) -> Principal {
    Principal::new(name, Role::Student)
}

/// Q1: single-select over O1/O2. Q2: multi-select over O3/O4/O5.
fn definition() -> CreateExamRequest {
    serde_json::from_value(json!({
        "title": "Sample Exam",
        "questions": [
            {
                "id": "Q1",
                "prompt": "What is 2+2?",
                "selection_mode": "single_select",
                "options": [{"id": "O1", "label": "4"}, {"id": "O2", "label": "5"}],
                "correct_option_ids": ["O1"]
            },
            {
                "id": "Q2",
                "prompt": "Select prime numbers",
                "selection_mode": "multi_select",
                "options": [
                    {"id": "O3", "label": "2"},
                    {"id": "O4", "label": "3"},
                    {"id": "O5", "label": "4"}
                ],
                "correct_option_ids": ["O3", "O4"]
            }
        ]
    }))
    .expect("definition should deserialize")
}

/// An exam with `n` independent multi-select questions q0..qn.
fn wide_definition(n: usize) -> CreateExamRequest {
    let questions: Vec<_> = (0..n)
        .map(|i| {
            json!({
                "id": format!("q{}", i),
                "prompt": format!("Question {}", i),
                "selection_mode": "multi_select",
                "options": [{"id": "a", "label": "A"}, {"id": "b", "label": "B"}],
                "correct_option_ids": ["a"]
            })
        })
        .collect();
    serde_json::from_value(json!({ "title": "Wide", "questions": questions })).unwrap()
}

fn select(question_id: &str, option_ids: &[&str]) -> SelectRequest {
    SelectRequest {
        question_id: question_id.to_string(),
        option_ids: option_ids.iter().map(|s| s.to_string()).collect(),
    }
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn create_active(coordinator: &Coordinator) -> String {
    let exam = coordinator.create_exam(&admin(), definition()).await.unwrap();
    coordinator.activate(&admin(), &exam.id).await.unwrap();
    exam.id
}

#[tokio::test]
async fn full_flow_select_submit_then_locked() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let alice = student("alice");

    let first = coordinator.select(&alice, &exam_id, &select("Q1", &["O1"])).await.unwrap();
    assert_eq!(first.version, 1);
    let second = coordinator
        .select(&alice, &exam_id, &select("Q2", &["O3", "O4"]))
        .await
        .unwrap();
    assert_eq!(second.version, 2);

    let expected = BTreeMap::from([
        ("Q1".to_string(), set(&["O1"])),
        ("Q2".to_string(), set(&["O3", "O4"])),
    ]);
    let state = coordinator.get_state(&alice, &exam_id).await.unwrap();
    assert_eq!(state.answers, expected);
    assert_eq!(state.status, AttemptStatus::InProgress);

    let result = coordinator.submit(&alice, &exam_id).await.unwrap();
    assert_eq!(result.answers, expected);

    let err = coordinator
        .select(&alice, &exam_id, &select("Q1", &["O2"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AttemptLocked(_)));

    let state = coordinator.get_state(&alice, &exam_id).await.unwrap();
    assert_eq!(state.answers, expected);
    assert_eq!(state.status, AttemptStatus::Submitted);
    assert_eq!(state.version, result.version);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selects_on_one_question_never_merge() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;

    for round in 0..20 {
        let who = student(&format!("student{}", round));

        let (c1, c2) = (coordinator.clone(), coordinator.clone());
        let (p1, p2) = (who.clone(), who.clone());
        let (e1, e2) = (exam_id.clone(), exam_id.clone());
        let a = tokio::spawn(async move { c1.select(&p1, &e1, &select("Q1", &["O1"])).await });
        let b = tokio::spawn(async move { c2.select(&p2, &e2, &select("Q1", &["O2"])).await });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let state = coordinator.get_state(&who, &exam_id).await.unwrap();
        let q1 = &state.answers["Q1"];
        assert!(*q1 == set(&["O1"]) || *q1 == set(&["O2"]), "merged: {:?}", q1);
        assert_eq!(state.version, 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selects_on_different_questions_are_not_lost() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam = coordinator.create_exam(&admin(), wide_definition(16)).await.unwrap();
    coordinator.activate(&admin(), &exam.id).await.unwrap();
    let alice = student("alice");

    let mut handles = Vec::new();
    for i in 0..16 {
        let (c, p, e) = (coordinator.clone(), alice.clone(), exam.id.clone());
        handles.push(tokio::spawn(async move {
            c.select(&p, &e, &select(&format!("q{}", i), &["a", "b"])).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = coordinator.get_state(&alice, &exam.id).await.unwrap();
    assert_eq!(state.answers.len(), 16);
    assert_eq!(state.version, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn select_racing_submit_is_either_included_or_locked() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;

    for round in 0..20 {
        let who = student(&format!("racer{}", round));
        coordinator.select(&who, &exam_id, &select("Q1", &["O1"])).await.unwrap();

        let (c1, c2) = (coordinator.clone(), coordinator.clone());
        let (p1, p2) = (who.clone(), who.clone());
        let (e1, e2) = (exam_id.clone(), exam_id.clone());
        let selecting = tokio::spawn(async move { c1.select(&p1, &e1, &select("Q1", &["O2"])).await });
        let submitting = tokio::spawn(async move { c2.submit(&p2, &e2).await });

        let selected = selecting.await.unwrap();
        let result = submitting.await.unwrap().unwrap();

        match selected {
            Ok(snapshot) => {
                assert!(snapshot.version < result.version);
                assert_eq!(result.answers["Q1"], set(&["O2"]));
            }
            Err(AppError::AttemptLocked(_)) => {
                assert_eq!(result.answers["Q1"], set(&["O1"]));
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }

        let state = coordinator.get_state(&who, &exam_id).await.unwrap();
        assert_eq!(state.answers, result.answers);
        assert_eq!(state.version, result.version);
    }
}

#[tokio::test]
async fn select_on_draft_fails_until_activated() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam = coordinator.create_exam(&admin(), definition()).await.unwrap();
    let alice = student("alice");

    let err = coordinator
        .select(&alice, &exam.id, &select("Q1", &["O1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExamNotActive(_)));
    // Nothing was created by the rejected call.
    assert!(matches!(
        coordinator.get_state(&alice, &exam.id).await,
        Err(AppError::NotFound(_))
    ));

    coordinator.activate(&admin(), &exam.id).await.unwrap();
    let snapshot = coordinator
        .select(&alice, &exam.id, &select("Q1", &["O1"]))
        .await
        .unwrap();
    assert_eq!(snapshot.answers["Q1"], set(&["O1"]));
}

#[tokio::test]
async fn select_on_unknown_or_closed_exam_is_not_active() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let alice = student("alice");

    let err = coordinator
        .select(&alice, "no-such-exam", &select("Q1", &["O1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExamNotActive(_)));

    coordinator.close(&admin(), &exam_id).await.unwrap();
    let err = coordinator
        .select(&alice, &exam_id, &select("Q1", &["O1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExamNotActive(_)));
}

#[tokio::test]
async fn students_never_see_each_other() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let (alice, bob) = (student("alice"), student("bob"));

    coordinator.select(&bob, &exam_id, &select("Q1", &["O2"])).await.unwrap();
    let bob_before = coordinator.get_state(&bob, &exam_id).await.unwrap();

    coordinator.select(&alice, &exam_id, &select("Q1", &["O1"])).await.unwrap();
    coordinator
        .select(&alice, &exam_id, &select("Q2", &["O3", "O4", "O5"]))
        .await
        .unwrap();
    coordinator.submit(&alice, &exam_id).await.unwrap();

    let bob_after = coordinator.get_state(&bob, &exam_id).await.unwrap();
    assert_eq!(bob_before, bob_after);
    assert_eq!(bob_after.status, AttemptStatus::InProgress);

    // Carol has no attempt, regardless of what others did on this exam.
    assert!(matches!(
        coordinator.get_state(&student("carol"), &exam_id).await,
        Err(AppError::NotFound(_))
    ));

    // Bob can still change his own answers after Alice submitted.
    let bob_next = coordinator.select(&bob, &exam_id, &select("Q1", &["O1"])).await.unwrap();
    assert_eq!(bob_next.version, 2);
}

#[tokio::test]
async fn single_select_replaces_only_its_own_question() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let alice = student("alice");

    coordinator.select(&alice, &exam_id, &select("Q1", &["O1"])).await.unwrap();
    coordinator.select(&alice, &exam_id, &select("Q2", &["O3"])).await.unwrap();

    let err = coordinator
        .select(&alice, &exam_id, &select("Q1", &["O1", "O2"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TooManySelections(_)));

    let snapshot = coordinator.select(&alice, &exam_id, &select("Q1", &["O2"])).await.unwrap();
    assert_eq!(snapshot.answers["Q1"], set(&["O2"]));
    assert_eq!(snapshot.answers["Q2"], set(&["O3"]));
    assert_eq!(snapshot.version, 3);
}

#[tokio::test]
async fn invalid_selections_leave_state_untouched() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let alice = student("alice");
    coordinator.select(&alice, &exam_id, &select("Q2", &["O3"])).await.unwrap();
    let before = coordinator.get_state(&alice, &exam_id).await.unwrap();

    let err = coordinator
        .select(&alice, &exam_id, &select("Q9", &["O1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownQuestion(_)));

    // O1 belongs to Q1, not Q2.
    let err = coordinator
        .select(&alice, &exam_id, &select("Q2", &["O3", "O1"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidOption(_)));

    assert_eq!(coordinator.get_state(&alice, &exam_id).await.unwrap(), before);
}

#[tokio::test]
async fn replayed_select_returns_same_version() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let alice = student("alice");

    let first = coordinator
        .select(&alice, &exam_id, &select("Q2", &["O3", "O4"]))
        .await
        .unwrap();
    let replay = coordinator
        .select(&alice, &exam_id, &select("Q2", &["O4", "O3"]))
        .await
        .unwrap();
    assert_eq!(first, replay);
}

#[tokio::test]
async fn empty_attempt_is_distinct_from_missing_attempt() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let alice = student("alice");

    assert!(matches!(
        coordinator.get_state(&alice, &exam_id).await,
        Err(AppError::NotFound(_))
    ));

    let snapshot = coordinator.select(&alice, &exam_id, &select("Q1", &[])).await.unwrap();
    assert_eq!(snapshot.version, 0);
    assert!(snapshot.answers.is_empty());

    let state = coordinator.get_state(&alice, &exam_id).await.unwrap();
    assert_eq!(state, snapshot);
}

#[tokio::test]
async fn submit_is_idempotent() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let alice = student("alice");
    coordinator.select(&alice, &exam_id, &select("Q1", &["O1"])).await.unwrap();

    let first = coordinator.submit(&alice, &exam_id).await.unwrap();
    let second = coordinator.submit(&alice, &exam_id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.version, 2);

    // Still the same once the exam is closed.
    coordinator.close(&admin(), &exam_id).await.unwrap();
    let third = coordinator.submit(&alice, &exam_id).await.unwrap();
    assert_eq!(first, third);
    assert_eq!(coordinator.get_state(&alice, &exam_id).await.unwrap().version, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_produce_one_result() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;
    let alice = student("alice");
    coordinator.select(&alice, &exam_id, &select("Q1", &["O2"])).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let (c, p, e) = (coordinator.clone(), alice.clone(), exam_id.clone());
        handles.push(tokio::spawn(async move { c.submit(&p, &e).await }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(results[0].version, 2);
}

#[tokio::test]
async fn submit_requires_active_exam_and_attempt() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let draft = coordinator.create_exam(&admin(), definition()).await.unwrap();
    let alice = student("alice");

    assert!(matches!(
        coordinator.submit(&alice, &draft.id).await,
        Err(AppError::ExamNotActive(_))
    ));

    coordinator.activate(&admin(), &draft.id).await.unwrap();
    assert!(matches!(
        coordinator.submit(&alice, &draft.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn admins_manage_students_attempt() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let alice = student("alice");

    assert!(matches!(
        coordinator.create_exam(&alice, definition()).await,
        Err(AppError::Forbidden(_))
    ));

    let exam_id = create_active(&coordinator).await;
    assert!(matches!(
        coordinator.close(&alice, &exam_id).await,
        Err(AppError::Forbidden(_))
    ));
    assert!(matches!(
        coordinator.activate(&alice, &exam_id).await,
        Err(AppError::Forbidden(_))
    ));
    assert!(matches!(
        coordinator.select(&admin(), &exam_id, &select("Q1", &["O1"])).await,
        Err(AppError::Forbidden(_))
    ));
}

#[tokio::test]
async fn invalid_definition_is_rejected() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let mut def = definition();
    def.questions[0].correct_option_ids.clear();

    assert!(matches!(
        coordinator.create_exam(&admin(), def).await,
        Err(AppError::InvalidDefinition(_))
    ));
}

#[tokio::test]
async fn reject_policy_refuses_second_activation() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let first = create_active(&coordinator).await;
    let second = coordinator.create_exam(&admin(), definition()).await.unwrap();

    let err = coordinator.activate(&admin(), &second.id).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyActive(_)));

    let active = coordinator.get_active(&admin()).await.unwrap();
    match active {
        ExamView::Full(exam) => assert_eq!(exam.id, first),
        ExamView::Public(_) => panic!("admins get the full view"),
    }

    // Once the first is closed, the second can go live.
    coordinator.close(&admin(), &first).await.unwrap();
    let activation = coordinator.activate(&admin(), &second.id).await.unwrap();
    assert_eq!(activation.replaced, None);
}

#[tokio::test]
async fn replace_policy_closes_previous_exam() {
    let coordinator = setup(ActivationPolicy::Replace).await;
    let first = create_active(&coordinator).await;
    let alice = student("alice");
    coordinator.select(&alice, &first, &select("Q1", &["O1"])).await.unwrap();

    let second = coordinator.create_exam(&admin(), definition()).await.unwrap();
    let activation = coordinator.activate(&admin(), &second.id).await.unwrap();
    assert_eq!(activation.replaced.as_deref(), Some(first.as_str()));

    match coordinator.get_exam(&admin(), &first).await.unwrap() {
        ExamView::Full(exam) => assert_eq!(exam.status, ExamStatus::Closed),
        ExamView::Public(_) => panic!("admins get the full view"),
    }
    assert!(matches!(
        coordinator.select(&alice, &first, &select("Q1", &["O2"])).await,
        Err(AppError::ExamNotActive(_))
    ));
    // Closed is terminal.
    assert!(matches!(
        coordinator.activate(&admin(), &first).await,
        Err(AppError::InvalidTransition(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_activations_leave_one_active_exam() {
    for policy in [ActivationPolicy::Reject, ActivationPolicy::Replace] {
        let coordinator = setup(policy).await;
        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(coordinator.create_exam(&admin(), definition()).await.unwrap().id);
        }

        let mut handles = Vec::new();
        for id in ids.clone() {
            let c = coordinator.clone();
            handles.push(tokio::spawn(async move { c.activate(&admin(), &id).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::AlreadyActive(_)) => assert_eq!(policy, ActivationPolicy::Reject),
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        let mut active = 0;
        for id in &ids {
            if let ExamView::Full(exam) = coordinator.get_exam(&admin(), id).await.unwrap() {
                if exam.status == ExamStatus::Active {
                    active += 1;
                }
            }
        }
        assert_eq!(active, 1, "policy {:?}", policy);
        match policy {
            ActivationPolicy::Reject => assert_eq!(succeeded, 1),
            ActivationPolicy::Replace => assert_eq!(succeeded, ids.len()),
        }
    }
}

#[tokio::test]
async fn close_is_idempotent_and_checks_existence() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let draft = coordinator.create_exam(&admin(), definition()).await.unwrap();

    coordinator.close(&admin(), &draft.id).await.unwrap();
    coordinator.close(&admin(), &draft.id).await.unwrap();

    assert!(matches!(
        coordinator.close(&admin(), "missing").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        coordinator.activate(&admin(), "missing").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn activating_the_active_exam_is_a_no_op() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let exam_id = create_active(&coordinator).await;

    let again = coordinator.activate(&admin(), &exam_id).await.unwrap();
    assert_eq!(again.exam_id, exam_id);
    assert_eq!(again.replaced, None);
}

#[tokio::test]
async fn students_get_public_views_and_no_drafts() {
    let coordinator = setup(ActivationPolicy::Reject).await;
    let alice = student("alice");

    assert!(matches!(
        coordinator.get_active(&alice).await,
        Err(AppError::NotFound(_))
    ));

    let draft = coordinator.create_exam(&admin(), definition()).await.unwrap();
    assert!(matches!(
        coordinator.get_exam(&alice, &draft.id).await,
        Err(AppError::NotFound(_))
    ));

    coordinator.activate(&admin(), &draft.id).await.unwrap();
    let view = coordinator.get_exam(&alice, &draft.id).await.unwrap();
    let json = serde_json::to_value(&view).unwrap();
    assert!(matches!(view, ExamView::Public(_)));
    assert!(json["questions"][0].get("correct_option_ids").is_none());

    let active = serde_json::to_value(coordinator.get_active(&alice).await.unwrap()).unwrap();
    assert_eq!(active["id"], draft.id.as_str());
    assert!(active["questions"][1].get("correct_option_ids").is_none());
}

/// A catalog whose storage has been corrupted into two active exams.
struct TwoActiveExams;

#[async_trait]
impl ExamStore for TwoActiveExams {
    async fn insert_exam(&self, _exam: &Exam) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_exam(&self, _exam_id: &str) -> Result<Option<Exam>, AppError> {
        Ok(None)
    }

    async fn active_exam_ids(&self) -> Result<Vec<String>, AppError> {
        Ok(vec!["e1".to_string(), "e2".to_string()])
    }

    async fn set_statuses(&self, _changes: &[(String, ExamStatus)]) -> Result<(), AppError> {
        Ok(())
    }
}

#[tokio::test]
async fn get_active_fails_closed_on_two_active_exams() {
    let pool = store::connect(&Config::for_tests(ActivationPolicy::Reject))
        .await
        .unwrap();
    store::migrate(&pool).await.unwrap();
    let coordinator = Coordinator::new(
        Arc::new(TwoActiveExams),
        Arc::new(SqliteStore::new(pool)),
        ActivationPolicy::Reject,
    );

    assert!(matches!(
        coordinator.get_active(&student("alice")).await,
        Err(AppError::InternalConsistency(_))
    ));
}
