//! Pipeline services
//!
//! The ledger, sequencer, dedupe gate and evaluator are composed by the
//! answer orchestrator; `InterviewLifecycle` owns interview creation and the
//! rating/completion write path shared by orchestrator and sequencer.

pub mod dedupe_gate;
pub mod entitlement;
pub mod evaluator;
pub mod lifecycle;
pub mod orchestrator;
pub mod question_bank;
pub mod sequencer;

pub use dedupe_gate::{Acquisition, EvaluationFailure, EvaluationGate, InFlightGuard, InFlightWaiter};
pub use entitlement::{
    Denial, DenialReason, EntitlementAction, EntitlementLedger, EntitlementView, Reservation,
    TierChange, UpgradeHint,
};
pub use evaluator::{
    EvaluationRequest, Evaluator, EvaluatorError, HttpEvaluator, RatingFields, StarScores,
    UnconfiguredEvaluator,
};
pub use lifecycle::{InterviewLifecycle, InterviewStateView, QuestionInput, StartedInterview};
pub use orchestrator::{AnswerOrchestrator, EvaluationStatus, SubmitAnswerRequest, SubmitOutcome};
pub use question_bank::QuestionBank;
pub use sequencer::{BlockReason, QuestionSequencer, StepOutcome, StepResult};

use starline_common::Error;
use thiserror::Error as ThisError;
use uuid::Uuid;

/// Pipeline operation errors
#[derive(Debug, ThisError)]
pub enum PipelineError {
    /// User-correctable input problem; nothing was written
    #[error("Validation error: {0}")]
    Validation(String),

    /// Quota exhausted; carries the upgrade hint
    #[error("{0}")]
    EntitlementDenied(Denial),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Referenced entities exist but the operation does not apply to their state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Evaluation failed; the answer is stored and can be retried explicitly
    #[error("Evaluator unavailable for answer {answer_id}: {reason}")]
    EvaluatorUnavailable { answer_id: Uuid, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[source] Error),
}

impl PipelineError {
    /// Only evaluator failures are worth retrying by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::EvaluatorUnavailable { .. })
    }
}

impl From<Error> for PipelineError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(what) => PipelineError::NotFound(what),
            Error::InvalidInput(msg) => PipelineError::Validation(msg),
            other => PipelineError::Storage(other),
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Storage(Error::Database(err))
    }
}

/// Result alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
