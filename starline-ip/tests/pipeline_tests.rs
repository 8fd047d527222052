//! End-to-end pipeline tests against a real SQLite database
//!
//! Covers entitlement races, duplicate submissions, sequencing rules,
//! evaluation retries and interview completion.

mod helpers;

use helpers::{fast_settings, setup, setup_with, ScriptedEvaluator, TestPipeline, ANSWER_TEXT};
use starline_common::db::{InterviewState, SubscriptionTier};
use starline_common::events::PipelineEvent;
use starline_ip::services::{
    BlockReason, DenialReason, EntitlementAction, EvaluationStatus, PipelineError, Reservation,
    StartedInterview, StepResult, SubmitAnswerRequest, SubmitOutcome, TierChange,
};
use std::time::Duration;
use uuid::Uuid;

fn answer_request(user_id: Uuid, started: &StartedInterview, ordinal: usize) -> SubmitAnswerRequest {
    SubmitAnswerRequest {
        user_id,
        interview_id: started.interview.id,
        question_id: started.questions[ordinal].id,
        text: ANSWER_TEXT.to_string(),
        time_spent_seconds: 90,
    }
}

async fn submit(p: &TestPipeline, user_id: Uuid, started: &StartedInterview, ordinal: usize) -> SubmitOutcome {
    p.state
        .orchestrator
        .submit_answer(answer_request(user_id, started, ordinal))
        .await
        .unwrap()
}

async fn ratings_for_answer(p: &TestPipeline, answer_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM ratings WHERE answer_id = ?")
        .bind(answer_id.to_string())
        .fetch_one(&p.state.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_free_user_journey() {
    let p = setup(ScriptedEvaluator::scoring(&[7.5])).await;
    let user = p.free_user().await;

    let started = p.state.lifecycle.start_interview(user.id, 3, None).await.unwrap();
    assert_eq!(started.interview.entitlement_tier, SubscriptionTier::Free);
    assert_eq!(started.questions.len(), 3);

    let first = submit(&p, user.id, &started, 0).await;
    assert!(!first.duplicate);
    match &first.evaluation {
        EvaluationStatus::Rated(rating) => assert_eq!(rating.overall_score, 7.5),
        other => panic!("expected rating, got {:?}", other),
    }

    let step = p.state.sequencer.advance(started.interview.id).await.unwrap();
    assert_eq!(step.result, StepResult::Moved { from: 0 });
    assert_eq!(step.current_question_index, 1);

    // Second answer exceeds the free allowance
    let denied = p
        .state
        .orchestrator
        .submit_answer(answer_request(user.id, &started, 1))
        .await;
    match denied {
        Err(PipelineError::EntitlementDenied(denial)) => {
            assert_eq!(denial.action, EntitlementAction::SubmitAnswer);
            assert_eq!(denial.reason, DenialReason::FreeAnswerLimitReached);
            let hint = denial.upgrade_hint.unwrap();
            assert_eq!(hint.target_tier, SubscriptionTier::Starter);
            assert_eq!(hint.price_delta_cents, 4900);
        }
        other => panic!("expected entitlement denial, got {:?}", other),
    }

    // Second interview exceeds the free interview allowance
    match p.state.lifecycle.start_interview(user.id, 3, None).await {
        Err(PipelineError::EntitlementDenied(denial)) => {
            assert_eq!(denial.reason, DenialReason::FreeInterviewLimitReached);
        }
        other => panic!("expected entitlement denial, got {:?}", other.map(|s| s.interview.id)),
    }

    let view = p.state.ledger.entitlement(user.id).await.unwrap();
    assert_eq!(view.free_answers_used, 1);
    assert_eq!(view.free_interviews_used, 1);
    assert_eq!(view.answers_remaining, Some(0));

    let state = p.state.lifecycle.interview_state(started.interview.id).await.unwrap();
    assert_eq!(state.answered_question_count, 1);
    assert_eq!(state.completed_question_count, 1);
    assert_eq!(state.state, InterviewState::InProgress);
}

#[tokio::test]
async fn test_starter_twelve_question_interview() {
    let p = setup(ScriptedEvaluator::scoring(&[8.0])).await;
    let user = p.starter_user(1).await;
    let mut events = p.state.event_bus.subscribe();

    let started = p.state.lifecycle.start_interview(user.id, 12, None).await.unwrap();
    assert_eq!(started.interview.entitlement_tier, SubscriptionTier::Starter);

    for ordinal in 0..12 {
        let outcome = submit(&p, user.id, &started, ordinal).await;
        assert!(matches!(outcome.evaluation, EvaluationStatus::Rated(_)));
        if ordinal < 11 {
            let step = p.state.sequencer.advance(started.interview.id).await.unwrap();
            assert_eq!(step.current_question_index, ordinal as u32 + 1);
        }
    }

    // The twelfth rating completed the interview
    let state = p.state.lifecycle.interview_state(started.interview.id).await.unwrap();
    assert_eq!(state.state, InterviewState::Completed);
    assert_eq!(state.completed_question_count, 12);
    assert_eq!(state.average_score, Some(8.0));
    assert!(state.completed_at.is_some());

    let step = p.state.sequencer.advance(started.interview.id).await.unwrap();
    assert_eq!(step.result, StepResult::Blocked(BlockReason::InterviewCompleted));

    match p.state.lifecycle.start_interview(user.id, 5, None).await {
        Err(PipelineError::EntitlementDenied(denial)) => {
            assert_eq!(denial.reason, DenialReason::StarterCreditsExhausted);
            let hint = denial.upgrade_hint.unwrap();
            assert_eq!(hint.target_tier, SubscriptionTier::Premium);
            assert_eq!(hint.price_delta_cents, 10_000);
        }
        other => panic!("expected entitlement denial, got {:?}", other.map(|s| s.interview.id)),
    }

    // Starter answers never touch the free counters
    let view = p.state.ledger.entitlement(user.id).await.unwrap();
    assert_eq!(view.free_answers_used, 0);
    assert_eq!(view.starter_interviews_used, 1);

    let mut completed_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PipelineEvent::InterviewCompleted { .. }) {
            completed_events += 1;
        }
    }
    assert_eq!(completed_events, 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_submissions_store_one_answer() {
    let p = setup(ScriptedEvaluator::scoring(&[6.0])).await;
    let user = p.free_user().await;
    let started = p.state.lifecycle.start_interview(user.id, 3, None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let orchestrator = p.state.orchestrator.clone();
        let request = answer_request(user.id, &started, 0);
        handles.push(tokio::spawn(async move { orchestrator.submit_answer(request).await }));
    }

    let mut answer_ids = Vec::new();
    let mut fresh = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if !outcome.duplicate {
            fresh += 1;
        }
        answer_ids.push(outcome.answer.id);
    }

    assert_eq!(fresh, 1);
    answer_ids.dedup();
    assert_eq!(answer_ids.len(), 1);

    let state = p.state.lifecycle.interview_state(started.interview.id).await.unwrap();
    assert_eq!(state.answered_question_count, 1);

    let view = p.state.ledger.entitlement(user.id).await.unwrap();
    assert_eq!(view.free_answers_used, 1);
    assert_eq!(ratings_for_answer(&p, answer_ids[0]).await, 1);
}

#[tokio::test]
async fn test_concurrent_free_reservations_allow_one() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.free_user().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = p.state.ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.reserve(user.id, EntitlementAction::StartInterview, None).await
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Reservation::Allowed { covered_by } => {
                assert_eq!(covered_by, SubscriptionTier::Free);
                allowed += 1;
            }
            Reservation::Denied(denial) => {
                assert_eq!(denial.reason, DenialReason::FreeInterviewLimitReached);
            }
        }
    }

    assert_eq!(allowed, 1);
    let view = p.state.ledger.entitlement(user.id).await.unwrap();
    assert_eq!(view.free_interviews_used, 1);
}

#[tokio::test]
async fn test_concurrent_interview_starts_create_one_interview() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.free_user().await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let lifecycle = p.state.lifecycle.clone();
        handles.push(tokio::spawn(async move { lifecycle.start_interview(user.id, 2, None).await }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(PipelineError::EntitlementDenied(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(created, 1);

    let interviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM interviews WHERE user_id = ?")
        .bind(user.id.to_string())
        .fetch_one(&p.state.db)
        .await
        .unwrap();
    assert_eq!(interviews, 1);
}

#[tokio::test]
async fn test_advance_on_unanswered_question_is_blocked() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 3, None).await.unwrap();

    let step = p.state.sequencer.advance(started.interview.id).await.unwrap();
    assert!(step.blocked());
    assert_eq!(step.result, StepResult::Blocked(BlockReason::Unanswered));
    assert_eq!(step.current_question_index, 0);

    let retreat = p.state.sequencer.retreat(started.interview.id).await.unwrap();
    assert_eq!(retreat.result, StepResult::Unchanged);

    let state = p.state.lifecycle.interview_state(started.interview.id).await.unwrap();
    assert_eq!(state.current_question_index, 0);
    assert_eq!(state.state, InterviewState::Created);
}

#[tokio::test]
async fn test_jump_bounded_by_furthest_question() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 4, None).await.unwrap();
    let id = started.interview.id;

    submit(&p, user.id, &started, 0).await;
    p.state.sequencer.advance(id).await.unwrap();
    submit(&p, user.id, &started, 1).await;
    p.state.sequencer.advance(id).await.unwrap();

    let back = p.state.sequencer.jump_to(id, 0).await.unwrap();
    assert_eq!(back.result, StepResult::Moved { from: 2 });

    // Back to the furthest question reached is allowed, past it is not
    let forward = p.state.sequencer.jump_to(id, 2).await.unwrap();
    assert_eq!(forward.current_question_index, 2);
    let skip = p.state.sequencer.jump_to(id, 3).await.unwrap();
    assert_eq!(skip.result, StepResult::Blocked(BlockReason::SkipAhead));
    assert_eq!(skip.current_question_index, 2);

    let out_of_range = p.state.sequencer.jump_to(id, 4).await;
    assert!(matches!(out_of_range, Err(PipelineError::Validation(_))));

    // Questions past the furthest index cannot be answered yet
    let early = p
        .state
        .orchestrator
        .submit_answer(answer_request(user.id, &started, 3))
        .await;
    assert!(matches!(early, Err(PipelineError::InvalidState(_))));
}

#[tokio::test]
async fn test_average_is_mean_of_ratings() {
    let p = setup(ScriptedEvaluator::scoring(&[6.0, 8.5, 7.0])).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 3, None).await.unwrap();

    for ordinal in 0..3 {
        submit(&p, user.id, &started, ordinal).await;
        if ordinal < 2 {
            p.state.sequencer.advance(started.interview.id).await.unwrap();
        }
    }

    let state = p.state.lifecycle.interview_state(started.interview.id).await.unwrap();
    assert_eq!(state.state, InterviewState::Completed);
    let average = state.average_score.unwrap();
    assert!((average - 7.1666).abs() < 0.001, "average was {}", average);
}

#[tokio::test]
async fn test_retry_evaluation_never_rereserves() {
    let p = setup(ScriptedEvaluator::scoring(&[9.0]).failing_first(1)).await;
    let user = p.free_user().await;
    let started = p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap();

    let outcome = submit(&p, user.id, &started, 0).await;
    match &outcome.evaluation {
        EvaluationStatus::Pending { error } => assert!(error.is_some()),
        other => panic!("expected pending, got {:?}", other),
    }

    let rating = p.state.orchestrator.retry_evaluation(outcome.answer.id).await.unwrap();
    assert_eq!(rating.answer_id, outcome.answer.id);
    assert_eq!(rating.overall_score, 9.0);

    // Already rated: no evaluator call, same rating
    let again = p.state.orchestrator.retry_evaluation(outcome.answer.id).await.unwrap();
    assert_eq!(again.id, rating.id);
    assert_eq!(p.evaluator.calls(), 2);

    let view = p.state.ledger.entitlement(user.id).await.unwrap();
    assert_eq!(view.free_answers_used, 1);

    let state = p.state.lifecycle.interview_state(started.interview.id).await.unwrap();
    assert_eq!(state.answered_question_count, 1);
    assert_eq!(state.completed_question_count, 1);

    // Resubmitting echoes the stored answer with its rating
    let echo = submit(&p, user.id, &started, 0).await;
    assert!(echo.duplicate);
    assert_eq!(echo.answer.id, outcome.answer.id);
    match echo.evaluation {
        EvaluationStatus::Rated(stored) => assert_eq!(stored.id, rating.id),
        other => panic!("expected stored rating, got {:?}", other),
    }
}

#[tokio::test]
async fn test_evaluator_timeout_leaves_answer_pending() {
    let settings = starline_ip::PipelineSettings {
        evaluator_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let evaluator = ScriptedEvaluator::scoring(&[6.5]).slow(Duration::from_secs(3), 1);
    let p = setup_with(evaluator, settings).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap();

    let outcome = submit(&p, user.id, &started, 0).await;
    assert!(matches!(outcome.evaluation, EvaluationStatus::Pending { error: Some(_) }));
    assert_eq!(ratings_for_answer(&p, outcome.answer.id).await, 0);
    assert_eq!(p.state.orchestrator.gate().in_flight_count().await, 0);

    let rating = p.state.orchestrator.retry_evaluation(outcome.answer.id).await.unwrap();
    assert_eq!(rating.overall_score, 6.5);
    assert_eq!(ratings_for_answer(&p, outcome.answer.id).await, 1);
}

#[tokio::test]
async fn test_concurrent_retries_share_one_evaluator_call() {
    let evaluator = ScriptedEvaluator::scoring(&[7.0])
        .failing_first(1)
        .slow(Duration::from_millis(300), usize::MAX);
    let p = setup(evaluator).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap();

    let outcome = submit(&p, user.id, &started, 0).await;
    assert!(matches!(outcome.evaluation, EvaluationStatus::Pending { .. }));
    assert_eq!(p.evaluator.calls(), 1);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let orchestrator = p.state.orchestrator.clone();
        let answer_id = outcome.answer.id;
        handles.push(tokio::spawn(async move { orchestrator.retry_evaluation(answer_id).await }));
    }

    let mut rating_ids = Vec::new();
    for handle in handles {
        rating_ids.push(handle.await.unwrap().unwrap().id);
    }
    rating_ids.dedup();

    assert_eq!(rating_ids.len(), 1);
    assert_eq!(p.evaluator.calls(), 2);
    assert_eq!(ratings_for_answer(&p, outcome.answer.id).await, 1);
}

#[tokio::test]
async fn test_concurrent_advance_at_last_question_completes_once() {
    // Evaluator always down: completion can only come from Advance
    let p = setup(ScriptedEvaluator::scoring(&[5.0]).failing_first(usize::MAX)).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap();
    let id = started.interview.id;

    submit(&p, user.id, &started, 0).await;
    p.state.sequencer.advance(id).await.unwrap();
    submit(&p, user.id, &started, 1).await;

    let mut events = p.state.event_bus.subscribe();
    let mut handles = Vec::new();
    for _ in 0..6 {
        let sequencer = p.state.sequencer.clone();
        handles.push(tokio::spawn(async move { sequencer.advance(id).await }));
    }

    let mut completed = 0;
    for handle in handles {
        let step = handle.await.unwrap().unwrap();
        assert_eq!(step.current_question_index, 1);
        match step.result {
            StepResult::Completed => completed += 1,
            StepResult::Blocked(BlockReason::InterviewCompleted) | StepResult::Unchanged => {}
            other => panic!("unexpected step result {:?}", other),
        }
    }
    assert_eq!(completed, 1);

    let state = p.state.lifecycle.interview_state(id).await.unwrap();
    assert_eq!(state.state, InterviewState::Completed);
    assert_eq!(state.completed_question_count, 0);
    assert_eq!(state.average_score, None);

    let mut completed_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PipelineEvent::InterviewCompleted { .. }) {
            completed_events += 1;
        }
    }
    assert_eq!(completed_events, 1);
}

#[tokio::test]
async fn test_foreign_interview_is_not_found() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let owner = p.starter_user(1).await;
    let intruder = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(owner.id, 2, None).await.unwrap();

    let result = p
        .state
        .orchestrator
        .submit_answer(answer_request(intruder.id, &started, 0))
        .await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));
    assert_eq!(p.evaluator.calls(), 0);
}

#[tokio::test]
async fn test_short_answer_rejected_without_reservation() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.free_user().await;
    let started = p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap();

    let mut request = answer_request(user.id, &started, 0);
    request.text = "   too short   ".to_string();
    let result = p.state.orchestrator.submit_answer(request).await;
    assert!(matches!(result, Err(PipelineError::Validation(_))));

    let view = p.state.ledger.entitlement(user.id).await.unwrap();
    assert_eq!(view.free_answers_used, 0);
}

#[tokio::test]
async fn test_shutdown_abandons_inflight_evaluation() {
    let evaluator = ScriptedEvaluator::scoring(&[7.0]).slow(Duration::from_secs(3), 1);
    let p = setup(evaluator).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap();

    let orchestrator = p.state.orchestrator.clone();
    let request = answer_request(user.id, &started, 0);
    let submission = tokio::spawn(async move { orchestrator.submit_answer(request).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    p.state.shutdown.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(1), submission)
        .await
        .expect("submission should return promptly after shutdown")
        .unwrap()
        .unwrap();
    assert!(matches!(outcome.evaluation, EvaluationStatus::Pending { error: Some(_) }));
    assert_eq!(ratings_for_answer(&p, outcome.answer.id).await, 0);
    assert_eq!(p.state.orchestrator.gate().in_flight_count().await, 0);

    // The answer itself survives shutdown
    let state = p.state.lifecycle.interview_state(started.interview.id).await.unwrap();
    assert_eq!(state.answered_question_count, 1);
}

#[tokio::test]
async fn test_retreat_moves_back_and_keeps_furthest() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 3, None).await.unwrap();
    let id = started.interview.id;

    submit(&p, user.id, &started, 0).await;
    p.state.sequencer.advance(id).await.unwrap();

    let back = p.state.sequencer.retreat(id).await.unwrap();
    assert_eq!(back.result, StepResult::Moved { from: 1 });
    assert_eq!(back.current_question_index, 0);

    let state = p.state.lifecycle.interview_state(id).await.unwrap();
    assert_eq!(state.current_question_index, 0);

    // Question 1 was reached before, so jumping back to it is allowed
    let forward = p.state.sequencer.jump_to(id, 1).await.unwrap();
    assert_eq!(forward.result, StepResult::Moved { from: 0 });
}

#[tokio::test]
async fn test_completed_interview_stays_navigable() {
    let p = setup(ScriptedEvaluator::scoring(&[6.0])).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap();
    let id = started.interview.id;

    submit(&p, user.id, &started, 0).await;
    p.state.sequencer.advance(id).await.unwrap();
    submit(&p, user.id, &started, 1).await;

    let state = p.state.lifecycle.interview_state(id).await.unwrap();
    assert_eq!(state.state, InterviewState::Completed);

    let back = p.state.sequencer.retreat(id).await.unwrap();
    assert_eq!(back.result, StepResult::Moved { from: 1 });

    let jump = p.state.sequencer.jump_to(id, 1).await.unwrap();
    assert_eq!(jump.result, StepResult::Moved { from: 0 });

    let forward = p.state.sequencer.advance(id).await.unwrap();
    assert_eq!(forward.result, StepResult::Blocked(BlockReason::InterviewCompleted));

    let state = p.state.lifecycle.interview_state(id).await.unwrap();
    assert_eq!(state.state, InterviewState::Completed);
    assert_eq!(state.current_question_index, 1);
}

#[tokio::test]
async fn test_set_tier_races_interview_starts() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.starter_user(2).await;

    let mut starts = Vec::new();
    for _ in 0..4 {
        let lifecycle = p.state.lifecycle.clone();
        starts.push(tokio::spawn(async move { lifecycle.start_interview(user.id, 2, None).await }));
    }
    let ledger = p.state.ledger.clone();
    let purchase = tokio::spawn(async move {
        ledger
            .set_tier(&TierChange {
                user_id: user.id,
                tier: SubscriptionTier::Starter,
                credited_interviews: 2,
                starter_expires_at: None,
            })
            .await
    });

    let mut created = 0;
    for handle in starts {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(PipelineError::EntitlementDenied(denial)) => {
                assert_eq!(denial.reason, DenialReason::StarterCreditsExhausted);
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    let updated = purchase.await.unwrap().unwrap();
    assert_eq!(updated.tier, SubscriptionTier::Starter);

    // Neither the purchase nor any reservation was lost
    let view = p.state.ledger.entitlement(user.id).await.unwrap();
    assert_eq!(view.starter_interview_credits, 4);
    assert_eq!(view.starter_interviews_used, created);
    assert!((2..=4).contains(&created), "created {} interviews", created);

    let interviews: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM interviews WHERE user_id = ?")
        .bind(user.id.to_string())
        .fetch_one(&p.state.db)
        .await
        .unwrap();
    assert_eq!(interviews, created as i64);
}

#[tokio::test]
async fn test_concurrent_free_answers_across_interviews_allow_one() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.premium_user().await;

    let mut interviews = Vec::new();
    for _ in 0..8 {
        interviews.push(p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap());
    }

    p.state
        .ledger
        .set_tier(&TierChange {
            user_id: user.id,
            tier: SubscriptionTier::Free,
            credited_interviews: 0,
            starter_expires_at: None,
        })
        .await
        .unwrap();

    // Distinct questions, so the duplicate echo never applies
    let mut handles = Vec::new();
    for started in &interviews {
        let orchestrator = p.state.orchestrator.clone();
        let request = answer_request(user.id, started, 0);
        handles.push(tokio::spawn(async move { orchestrator.submit_answer(request).await }));
    }

    let mut stored = 0;
    let mut denied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => {
                assert!(!outcome.duplicate);
                stored += 1;
            }
            Err(PipelineError::EntitlementDenied(denial)) => {
                assert_eq!(denial.reason, DenialReason::FreeAnswerLimitReached);
                denied += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(stored, 1);
    assert_eq!(denied, 7);

    let answers: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM answers a JOIN interviews i ON i.id = a.interview_id WHERE i.user_id = ?",
    )
    .bind(user.id.to_string())
    .fetch_one(&p.state.db)
    .await
    .unwrap();
    assert_eq!(answers, 1);

    let view = p.state.ledger.entitlement(user.id).await.unwrap();
    assert_eq!(view.free_answers_used, 1);
}

#[tokio::test]
async fn test_corrupt_interview_row_is_storage_fault() {
    let p = setup(ScriptedEvaluator::scoring(&[5.0])).await;
    let user = p.starter_user(1).await;
    let started = p.state.lifecycle.start_interview(user.id, 2, None).await.unwrap();

    sqlx::query("UPDATE interviews SET entitlement_tier = 'gold' WHERE id = ?")
        .bind(started.interview.id.to_string())
        .execute(&p.state.db)
        .await
        .unwrap();

    let result = p
        .state
        .orchestrator
        .submit_answer(answer_request(user.id, &started, 0))
        .await;
    assert!(
        matches!(result, Err(PipelineError::Storage(_))),
        "expected storage fault, got {:?}",
        result.map(|o| o.answer.id)
    );
    assert_eq!(p.evaluator.calls(), 0);
}
