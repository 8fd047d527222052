//! Interview lifecycle
//!
//! Interview creation (Created, questions pre-generated), the read model, and
//! the rating write path that advances `completed_question_count` and
//! performs the InProgress → Completed transition.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use starline_common::db::{
    Difficulty, Interview, InterviewState, Question, Rating, SubscriptionTier,
};
use starline_common::events::{EventBus, PipelineEvent};
use starline_common::Error;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::entitlement::{EntitlementAction, EntitlementLedger, Reservation};
use super::question_bank::{QuestionBank, QuestionDraft};
use super::{PipelineError, PipelineResult};
use crate::db::{answers, interviews, questions, ratings};
use crate::utils::retry_on_conflict;

/// Client-supplied question (replaces catalogue generation)
#[derive(Debug, Clone, Deserialize)]
pub struct QuestionInput {
    pub competency: String,
    pub text: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

/// A freshly started interview with its questions
#[derive(Debug, Clone, Serialize)]
pub struct StartedInterview {
    pub interview: Interview,
    pub questions: Vec<Question>,
}

/// Interview read model
#[derive(Debug, Clone, Serialize)]
pub struct InterviewStateView {
    pub interview_id: Uuid,
    pub user_id: Uuid,
    pub current_question_index: u32,
    pub furthest_question_index: u32,
    pub completed_question_count: u32,
    pub answered_question_count: u32,
    pub total_questions: u32,
    pub state: InterviewState,
    pub entitlement_tier: SubscriptionTier,
    pub average_score: Option<f64>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
}

/// Interview lifecycle service
pub struct InterviewLifecycle {
    db: SqlitePool,
    event_bus: EventBus,
    ledger: Arc<EntitlementLedger>,
    bank: QuestionBank,
    max_questions: u32,
}

impl InterviewLifecycle {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        ledger: Arc<EntitlementLedger>,
        max_questions: u32,
    ) -> Self {
        Self {
            db,
            event_bus,
            ledger,
            bank: QuestionBank::new(),
            max_questions,
        }
    }

    /// Reserve a StartInterview allowance and create the interview with all
    /// of its questions in one transaction.
    pub async fn start_interview(
        &self,
        user_id: Uuid,
        total_questions: u32,
        supplied: Option<Vec<QuestionInput>>,
    ) -> PipelineResult<StartedInterview> {
        let drafts = self.question_drafts(total_questions, supplied)?;

        let ledger = &self.ledger;
        let drafts = &drafts;
        let outcome = retry_on_conflict(
            "start_interview",
            self.ledger.max_lock_wait_ms(),
            || async move {
                let mut tx = self.db.begin().await?;

                let covered_by = match ledger
                    .reserve_in(&mut tx, user_id, EntitlementAction::StartInterview, None)
                    .await?
                {
                    Reservation::Allowed { covered_by } => covered_by,
                    Reservation::Denied(denial) => return Ok(Err(denial)),
                };

                let interview = Interview::new(user_id, total_questions, covered_by);
                interviews::insert_interview(&mut *tx, &interview).await?;

                let mut created = Vec::with_capacity(drafts.len());
                for (ordinal, draft) in drafts.iter().enumerate() {
                    let question = Question {
                        id: Uuid::new_v4(),
                        interview_id: interview.id,
                        ordinal: ordinal as u32,
                        competency: draft.competency.clone(),
                        text: draft.text.clone(),
                        difficulty: draft.difficulty,
                    };
                    questions::insert_question(&mut *tx, &question).await?;
                    created.push(question);
                }

                tx.commit().await?;
                Ok(Ok(StartedInterview {
                    interview,
                    questions: created,
                }))
            },
        )
        .await?;

        match outcome {
            Ok(started) => {
                info!(
                    interview_id = %started.interview.id,
                    user_id = %user_id,
                    total_questions,
                    entitlement_tier = %started.interview.entitlement_tier,
                    "Interview started"
                );
                self.event_bus.emit_lossy(PipelineEvent::InterviewStarted {
                    interview_id: started.interview.id,
                    user_id,
                    total_questions,
                    entitlement_tier: started.interview.entitlement_tier,
                    timestamp: Utc::now(),
                });
                Ok(started)
            }
            Err(denial) => {
                self.ledger.emit_denied(user_id, &denial);
                Err(PipelineError::EntitlementDenied(denial))
            }
        }
    }

    fn question_drafts(
        &self,
        total_questions: u32,
        supplied: Option<Vec<QuestionInput>>,
    ) -> PipelineResult<Vec<QuestionDraft>> {
        if total_questions == 0 || total_questions > self.max_questions {
            return Err(PipelineError::Validation(format!(
                "total_questions must be between 1 and {}",
                self.max_questions
            )));
        }

        let Some(supplied) = supplied else {
            return Ok(self.bank.generate(total_questions));
        };

        if supplied.len() != total_questions as usize {
            return Err(PipelineError::Validation(format!(
                "{} questions supplied for total_questions = {}",
                supplied.len(),
                total_questions
            )));
        }

        supplied
            .into_iter()
            .map(|input| {
                if input.text.trim().is_empty() || input.competency.trim().is_empty() {
                    return Err(PipelineError::Validation(
                        "question text and competency must not be empty".to_string(),
                    ));
                }
                Ok(QuestionDraft {
                    competency: input.competency.trim().to_string(),
                    text: input.text.trim().to_string(),
                    difficulty: input.difficulty.unwrap_or(Difficulty::Medium),
                })
            })
            .collect()
    }

    pub async fn load_interview(&self, interview_id: Uuid) -> PipelineResult<Interview> {
        interviews::load_interview(&self.db, interview_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Interview {}", interview_id)))
    }

    /// Interview read model
    pub async fn interview_state(&self, interview_id: Uuid) -> PipelineResult<InterviewStateView> {
        let interview = self.load_interview(interview_id).await?;
        let answered = answers::count_answers(&self.db, interview_id).await?;

        Ok(InterviewStateView {
            interview_id: interview.id,
            user_id: interview.user_id,
            current_question_index: interview.current_question_index,
            furthest_question_index: interview.furthest_question_index,
            completed_question_count: interview.completed_question_count,
            answered_question_count: answered,
            total_questions: interview.total_questions,
            state: interview.state,
            entitlement_tier: interview.entitlement_tier,
            average_score: interview.average_score,
            completed_at: interview.completed_at,
        })
    }

    /// Questions of an interview in order
    pub async fn list_questions(&self, interview_id: Uuid) -> PipelineResult<Vec<Question>> {
        self.load_interview(interview_id).await?;
        Ok(questions::list_questions(&self.db, interview_id).await?)
    }

    /// Ratings recorded so far for an interview
    pub async fn list_ratings(&self, interview_id: Uuid) -> PipelineResult<Vec<Rating>> {
        self.load_interview(interview_id).await?;
        Ok(ratings::list_ratings_for_interview(&self.db, interview_id).await?)
    }

    /// Persist a rating and advance the interview.
    ///
    /// The insert, the counter increment and any completion commit together.
    /// If the answer already has a rating, that rating is returned unchanged.
    pub async fn record_rating(&self, interview_id: Uuid, rating: Rating) -> PipelineResult<Rating> {
        let rating = &rating;
        let (stored, inserted, completed) = retry_on_conflict(
            "record_rating",
            self.ledger.max_lock_wait_ms(),
            || async move {
                let mut tx = self.db.begin().await?;

                if !ratings::insert_rating(&mut tx, rating).await? {
                    let existing = ratings::load_rating_for_answer(&mut *tx, rating.answer_id)
                        .await?
                        .ok_or_else(|| {
                            Error::Internal(format!(
                                "rating for answer {} vanished",
                                rating.answer_id
                            ))
                        })?;
                    return Ok((existing, false, None));
                }

                interviews::increment_completed_count(&mut tx, interview_id).await?;

                let interview = interviews::load_interview(&mut *tx, interview_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Interview {}", interview_id)))?;

                let mut completed = None;
                if interview.state.is_terminal() {
                    interviews::refresh_average(&mut tx, interview_id).await?;
                } else if interview.completed_question_count >= interview.total_questions
                    && interviews::try_complete(&mut tx, interview_id).await?
                {
                    completed = interviews::load_interview(&mut *tx, interview_id).await?;
                }

                tx.commit().await?;
                Ok((rating.clone(), true, completed))
            },
        )
        .await?;

        if inserted {
            self.event_bus.emit_lossy(PipelineEvent::EvaluationCompleted {
                interview_id,
                answer_id: stored.answer_id,
                rating_id: stored.id,
                overall_score: stored.overall_score,
                timestamp: Utc::now(),
            });
        } else {
            warn!(answer_id = %stored.answer_id, "Rating already stored, keeping existing");
        }

        if let Some(interview) = completed {
            self.emit_completed(&interview);
        }

        Ok(stored)
    }

    pub(crate) fn emit_completed(&self, interview: &Interview) {
        info!(
            interview_id = %interview.id,
            user_id = %interview.user_id,
            average_score = ?interview.average_score,
            "Interview completed"
        );
        self.event_bus.emit_lossy(PipelineEvent::InterviewCompleted {
            interview_id: interview.id,
            user_id: interview.user_id,
            average_score: interview.average_score,
            timestamp: Utc::now(),
        });
    }
}
