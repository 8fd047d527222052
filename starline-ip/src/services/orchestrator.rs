//! Answer Submission Orchestrator
//!
//! **Submission flow:**
//! 1. Interview belongs to the user, question belongs to the interview
//! 2. Answer text length within configured limits
//! 3. Entitlement reservation and answer insert, committed together
//! 4. Evaluation through the dedupe gate (one evaluator call per answer)
//! 5. Rating persisted, interview progress updated
//!
//! An existing answer for the same question short-circuits to an idempotent
//! echo before any reservation. Evaluation failures leave the answer stored
//! without a rating; `retry_evaluation` re-enters step 4.

use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use starline_common::config::AnswerLimits;
use starline_common::db::{Answer, Interview, InterviewState, Question, Rating};
use starline_common::events::{EventBus, PipelineEvent};
use starline_common::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dedupe_gate::{Acquisition, EvaluationFailure, EvaluationGate};
use super::entitlement::{Denial, EntitlementAction, EntitlementLedger, Reservation};
use super::evaluator::{EvaluationRequest, Evaluator, EvaluatorError};
use super::lifecycle::InterviewLifecycle;
use super::{PipelineError, PipelineResult};
use crate::db::{answers, interviews, questions, ratings};
use crate::utils::retry_on_conflict;

/// SubmitAnswer input
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAnswerRequest {
    pub user_id: Uuid,
    pub interview_id: Uuid,
    pub question_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub time_spent_seconds: u32,
}

/// Evaluation state of a submitted answer
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationStatus {
    Rated(Rating),
    /// No rating yet; `error` is set when this call's evaluation failed
    Pending { error: Option<String> },
}

/// SubmitAnswer result
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub answer: Answer,
    pub evaluation: EvaluationStatus,
    /// True when an earlier submission was echoed back
    pub duplicate: bool,
}

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub answer_limits: AnswerLimits,
    pub evaluator_timeout: Duration,
    pub max_lock_wait_ms: u64,
}

enum Persisted {
    Stored { answer: Answer, state_changed: bool },
    Duplicate(Answer),
    Denied(Denial),
    /// Completed between the first check and the transaction
    Completed,
}

/// Answer Submission Orchestrator
pub struct AnswerOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    ledger: Arc<EntitlementLedger>,
    lifecycle: Arc<InterviewLifecycle>,
    gate: EvaluationGate,
    evaluator: Arc<dyn Evaluator>,
    settings: OrchestratorSettings,
    shutdown: CancellationToken,
}

impl AnswerOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        ledger: Arc<EntitlementLedger>,
        lifecycle: Arc<InterviewLifecycle>,
        gate: EvaluationGate,
        evaluator: Arc<dyn Evaluator>,
        settings: OrchestratorSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            event_bus,
            ledger,
            lifecycle,
            gate,
            evaluator,
            settings,
            shutdown,
        }
    }

    pub fn gate(&self) -> &EvaluationGate {
        &self.gate
    }

    /// Submit an answer and evaluate it
    pub async fn submit_answer(&self, request: SubmitAnswerRequest) -> PipelineResult<SubmitOutcome> {
        let interview = interviews::load_interview(&self.db, request.interview_id)
            .await?
            .filter(|i| i.user_id == request.user_id)
            .ok_or_else(|| PipelineError::NotFound(format!("Interview {}", request.interview_id)))?;

        let question = questions::load_question(&self.db, request.question_id)
            .await?
            .filter(|q| q.interview_id == interview.id)
            .ok_or_else(|| PipelineError::NotFound(format!("Question {}", request.question_id)))?;

        if let Some(existing) = answers::find_answer(&self.db, interview.id, question.id).await? {
            return self.duplicate_echo(existing).await;
        }

        if interview.state.is_terminal() {
            return Err(PipelineError::InvalidState(format!(
                "interview {} is completed",
                interview.id
            )));
        }
        if question.ordinal > interview.furthest_question_index {
            return Err(PipelineError::InvalidState(format!(
                "question {} not yet reached",
                question.ordinal
            )));
        }

        let text = validate_answer_text(&request.text, self.settings.answer_limits)?;

        let persisted = self
            .persist_answer(&interview, &question, text, request.time_spent_seconds)
            .await?;

        let answer = match persisted {
            Persisted::Denied(denial) => {
                self.ledger.emit_denied(request.user_id, &denial);
                return Err(PipelineError::EntitlementDenied(denial));
            }
            Persisted::Duplicate(existing) => return self.duplicate_echo(existing).await,
            Persisted::Completed => {
                return Err(PipelineError::InvalidState(format!(
                    "interview {} is completed",
                    interview.id
                )));
            }
            Persisted::Stored {
                answer,
                state_changed,
            } => {
                info!(
                    answer_id = %answer.id,
                    interview_id = %interview.id,
                    question_ordinal = question.ordinal,
                    "Answer persisted"
                );
                self.event_bus.emit_lossy(PipelineEvent::AnswerSubmitted {
                    interview_id: interview.id,
                    question_id: question.id,
                    answer_id: answer.id,
                    timestamp: Utc::now(),
                });
                if state_changed {
                    self.event_bus.emit_lossy(PipelineEvent::InterviewStateChanged {
                        interview_id: interview.id,
                        old_state: InterviewState::Created,
                        new_state: InterviewState::InProgress,
                        timestamp: Utc::now(),
                    });
                }
                answer
            }
        };

        let evaluation = match self.evaluate(&answer, &question).await {
            Ok(rating) => EvaluationStatus::Rated(rating),
            Err(PipelineError::EvaluatorUnavailable { reason, .. }) => EvaluationStatus::Pending {
                error: Some(reason),
            },
            Err(e) => return Err(e),
        };

        Ok(SubmitOutcome {
            answer,
            evaluation,
            duplicate: false,
        })
    }

    /// Re-run evaluation for a stored answer.
    ///
    /// Never re-reserves entitlement and never writes a second answer.
    pub async fn retry_evaluation(&self, answer_id: Uuid) -> PipelineResult<Rating> {
        let answer = answers::load_answer(&self.db, answer_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Answer {}", answer_id)))?;
        let question = questions::load_question(&self.db, answer.question_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Question {}", answer.question_id)))?;

        info!(answer_id = %answer_id, "Retrying evaluation");
        self.evaluate(&answer, &question).await
    }

    /// Reservation and answer insert in one transaction
    async fn persist_answer(
        &self,
        interview: &Interview,
        question: &Question,
        text: String,
        time_spent_seconds: u32,
    ) -> PipelineResult<Persisted> {
        let answer = Answer {
            id: Uuid::new_v4(),
            interview_id: interview.id,
            question_id: question.id,
            text,
            time_spent_seconds,
            answered_at: Utc::now(),
        };

        let ledger = &self.ledger;
        let answer = &answer;
        retry_on_conflict(
            "submit_answer",
            self.settings.max_lock_wait_ms,
            || async move {
                let mut tx = self.db.begin().await?;

                let current = interviews::load_interview(&mut *tx, interview.id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Interview {}", interview.id)))?;
                if current.state.is_terminal() {
                    return Ok(Persisted::Completed);
                }

                // A concurrent submission committed first: echo it, reserve nothing
                if let Some(existing) =
                    answers::find_answer(&mut *tx, interview.id, question.id).await?
                {
                    return Ok(Persisted::Duplicate(existing));
                }

                match ledger
                    .reserve_in(
                        &mut tx,
                        interview.user_id,
                        EntitlementAction::SubmitAnswer,
                        Some(current.entitlement_tier),
                    )
                    .await?
                {
                    Reservation::Allowed { .. } => {}
                    Reservation::Denied(denial) => return Ok(Persisted::Denied(denial)),
                }

                if !answers::insert_answer(&mut tx, answer).await? {
                    // Rolls back the reservation
                    drop(tx);
                    let existing =
                        answers::find_answer(&self.db, interview.id, question.id)
                            .await?
                            .ok_or_else(|| {
                                Error::Internal(format!(
                                    "answer for question {} vanished",
                                    question.id
                                ))
                            })?;
                    return Ok(Persisted::Duplicate(existing));
                }

                let state_changed = interviews::mark_in_progress(&mut tx, interview.id).await?;
                tx.commit().await?;

                Ok(Persisted::Stored {
                    answer: answer.clone(),
                    state_changed,
                })
            },
        )
        .await
        .map_err(PipelineError::from)
    }

    async fn duplicate_echo(&self, answer: Answer) -> PipelineResult<SubmitOutcome> {
        debug!(answer_id = %answer.id, "Duplicate answer, echoing stored result");
        let evaluation = match ratings::load_rating_for_answer(&self.db, answer.id).await? {
            Some(rating) => EvaluationStatus::Rated(rating),
            None => EvaluationStatus::Pending { error: None },
        };

        Ok(SubmitOutcome {
            answer,
            evaluation,
            duplicate: true,
        })
    }

    /// Evaluate through the dedupe gate
    async fn evaluate(&self, answer: &Answer, question: &Question) -> PipelineResult<Rating> {
        let db = &self.db;
        let answer_id = answer.id;
        let acquisition = self
            .gate
            .acquire(answer_id, || ratings::load_rating_for_answer(db, answer_id))
            .await?;

        let guard = match acquisition {
            Acquisition::AlreadyTerminal(rating) => return Ok(rating),
            Acquisition::AttachToInFlight(waiter) => {
                return waiter
                    .wait()
                    .await
                    .map_err(|failure| PipelineError::EvaluatorUnavailable {
                        answer_id,
                        reason: failure.reason,
                    });
            }
            Acquisition::FirstCaller(guard) => guard,
        };

        let result = match self.call_evaluator(answer, question).await {
            Ok(rating) => self.lifecycle.record_rating(answer.interview_id, rating).await,
            Err(e) => {
                warn!(
                    answer_id = %answer_id,
                    evaluator = self.evaluator.name(),
                    error = %e,
                    "Evaluation failed, answer left pending"
                );
                self.event_bus.emit_lossy(PipelineEvent::EvaluationFailed {
                    interview_id: answer.interview_id,
                    answer_id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(PipelineError::EvaluatorUnavailable {
                    answer_id,
                    reason: e.to_string(),
                })
            }
        };

        let shared = match &result {
            Ok(rating) => Ok(rating.clone()),
            Err(PipelineError::EvaluatorUnavailable { reason, .. }) => {
                Err(EvaluationFailure::new(reason.clone()))
            }
            Err(e) => Err(EvaluationFailure::new(e.to_string())),
        };
        guard.complete(shared).await;

        result
    }

    /// One bounded evaluator call, abandoned on timeout or shutdown
    async fn call_evaluator(
        &self,
        answer: &Answer,
        question: &Question,
    ) -> Result<Rating, EvaluatorError> {
        let request = EvaluationRequest {
            question: question.text.clone(),
            competency: question.competency.clone(),
            answer: answer.text.clone(),
            model: None,
        };
        let timeout = self.settings.evaluator_timeout;

        let fields = tokio::select! {
            _ = self.shutdown.cancelled() => Err(EvaluatorError::Cancelled),
            result = tokio::time::timeout(timeout, self.evaluator.evaluate(&request, timeout)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(EvaluatorError::Timeout(timeout)),
                }
            }
        }?;

        fields.validate()?;
        Ok(fields.into_rating(answer.id))
    }
}

/// Trim and length-check answer text (length in characters)
pub fn validate_answer_text(text: &str, limits: AnswerLimits) -> PipelineResult<String> {
    let trimmed = text.trim();
    let length = trimmed.chars().count();

    if length < limits.min_chars {
        return Err(PipelineError::Validation(format!(
            "answer must be at least {} characters (got {})",
            limits.min_chars, length
        )));
    }
    if length > limits.max_chars {
        return Err(PipelineError::Validation(format!(
            "answer must be at most {} characters (got {})",
            limits.max_chars, length
        )));
    }

    Ok(trimmed.to_string())
}
