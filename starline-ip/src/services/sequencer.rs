//! Question Sequencer
//!
//! Ordering rules within one interview:
//! - `advance` moves forward one question, only when the current question
//!   has an answer; on the last question it attempts completion
//! - `retreat` moves back one question, floored at 0
//! - `jump_to` moves to any index up to the furthest question reached
//!
//! Index writes are compare-and-set on the observed index. The sequencer
//! never calls the evaluator.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use starline_common::db::Interview;
use starline_common::events::{EventBus, PipelineEvent};
use starline_common::Error;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::lifecycle::InterviewLifecycle;
use super::{PipelineError, PipelineResult};
use crate::db::{answers, interviews};
use crate::utils::retry_on_conflict;

/// Why a step was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    /// The current question has no answer yet
    Unanswered,
    /// Target index is beyond the furthest question reached
    SkipAhead,
    InterviewCompleted,
}

/// What a sequencer call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Moved { from: u32 },
    Unchanged,
    Blocked(BlockReason),
    /// This call completed the interview
    Completed,
}

/// Sequencer call outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub interview_id: Uuid,
    pub current_question_index: u32,
    pub result: StepResult,
}

impl StepOutcome {
    pub fn blocked(&self) -> bool {
        matches!(self.result, StepResult::Blocked(_))
    }
}

/// Question Sequencer service
pub struct QuestionSequencer {
    db: SqlitePool,
    event_bus: EventBus,
    lifecycle: Arc<InterviewLifecycle>,
    max_lock_wait_ms: u64,
}

enum Step {
    Forward,
    Back,
    To(u32),
}

impl QuestionSequencer {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        lifecycle: Arc<InterviewLifecycle>,
        max_lock_wait_ms: u64,
    ) -> Self {
        Self {
            db,
            event_bus,
            lifecycle,
            max_lock_wait_ms,
        }
    }

    /// Move to the next question if the current one is answered
    pub async fn advance(&self, interview_id: Uuid) -> PipelineResult<StepOutcome> {
        self.step(interview_id, Step::Forward).await
    }

    /// Move to the previous question (no-op at 0)
    pub async fn retreat(&self, interview_id: Uuid) -> PipelineResult<StepOutcome> {
        self.step(interview_id, Step::Back).await
    }

    /// Move to `index`, which must not be ahead of the furthest question reached
    pub async fn jump_to(&self, interview_id: Uuid, index: u32) -> PipelineResult<StepOutcome> {
        self.step(interview_id, Step::To(index)).await
    }

    async fn step(&self, interview_id: Uuid, step: Step) -> PipelineResult<StepOutcome> {
        let step = &step;
        let (outcome, completed) = retry_on_conflict(
            "sequencer_step",
            self.max_lock_wait_ms,
            || async move {
                let mut tx = self.db.begin().await?;

                let interview = interviews::load_interview(&mut *tx, interview_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("Interview {}", interview_id)))?;
                let current = interview.current_question_index;
                let stay = |result: StepResult| (unmoved(&interview, result), None::<Interview>);

                let target = match *step {
                    Step::Forward => {
                        if interview.state.is_terminal() {
                            return Ok(stay(StepResult::Blocked(BlockReason::InterviewCompleted)));
                        }
                        if !answers::is_answered(&mut *tx, interview_id, current).await? {
                            return Ok(stay(StepResult::Blocked(BlockReason::Unanswered)));
                        }
                        if current >= interview.last_index() {
                            let answered = answers::count_answers(&mut *tx, interview_id).await?;
                            if answered < interview.total_questions {
                                return Ok(stay(StepResult::Blocked(BlockReason::Unanswered)));
                            }
                            if !interviews::try_complete(&mut tx, interview_id).await? {
                                return Ok(stay(StepResult::Unchanged));
                            }
                            let completed = interviews::load_interview(&mut *tx, interview_id).await?;
                            tx.commit().await?;
                            return Ok((unmoved(&interview, StepResult::Completed), completed));
                        }
                        current + 1
                    }
                    Step::Back => {
                        if current == 0 {
                            return Ok(stay(StepResult::Unchanged));
                        }
                        current - 1
                    }
                    Step::To(index) => {
                        if index >= interview.total_questions {
                            return Err(Error::InvalidInput(format!(
                                "index {} out of range for {} questions",
                                index, interview.total_questions
                            )));
                        }
                        if index > interview.furthest_question_index {
                            return Ok(stay(StepResult::Blocked(BlockReason::SkipAhead)));
                        }
                        if index == current {
                            return Ok(stay(StepResult::Unchanged));
                        }
                        index
                    }
                };

                if !interviews::set_question_index(&mut tx, interview_id, current, target).await? {
                    return Err(Error::Conflict(format!(
                        "interview {} index moved from {}",
                        interview_id, current
                    )));
                }
                tx.commit().await?;

                Ok((
                    StepOutcome {
                        interview_id,
                        current_question_index: target,
                        result: StepResult::Moved { from: current },
                    },
                    None,
                ))
            },
        )
        .await
        .map_err(PipelineError::from)?;

        if let StepResult::Moved { from } = outcome.result {
            debug!(
                interview_id = %interview_id,
                old_index = from,
                new_index = outcome.current_question_index,
                "Question index changed"
            );
            self.event_bus.emit_lossy(PipelineEvent::QuestionIndexChanged {
                interview_id,
                old_index: from,
                new_index: outcome.current_question_index,
                timestamp: Utc::now(),
            });
        }

        if let Some(interview) = completed {
            self.lifecycle.emit_completed(&interview);
        }

        Ok(outcome)
    }
}

fn unmoved(interview: &Interview, result: StepResult) -> StepOutcome {
    StepOutcome {
        interview_id: interview.id,
        current_question_index: interview.current_question_index,
        result,
    }
}
