//! Answer handlers
//!
//! POST /answers, POST /answers/:answer_id/retry-evaluation

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use starline_common::db::{Answer, Rating};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::{EvaluationStatus, SubmitAnswerRequest, SubmitOutcome};
use crate::AppState;

/// Evaluation error reported alongside a pending answer
#[derive(Debug, Serialize)]
pub struct PendingError {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// POST /answers response
#[derive(Debug, Serialize)]
pub struct SubmitAnswerResponse {
    pub answer: Answer,
    pub rating: Option<Rating>,
    pub pending: bool,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PendingError>,
}

impl From<SubmitOutcome> for SubmitAnswerResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        let (rating, error) = match outcome.evaluation {
            EvaluationStatus::Rated(rating) => (Some(rating), None),
            EvaluationStatus::Pending { error } => (
                None,
                error.map(|message| PendingError {
                    code: "EVALUATOR_UNAVAILABLE",
                    message,
                    retryable: true,
                }),
            ),
        };

        Self {
            pending: rating.is_none(),
            answer: outcome.answer,
            rating,
            duplicate: outcome.duplicate,
            error,
        }
    }
}

/// POST /answers/:answer_id/retry-evaluation response
#[derive(Debug, Serialize)]
pub struct RetryEvaluationResponse {
    pub answer_id: Uuid,
    pub rating: Rating,
    pub pending: bool,
}

/// POST /answers
///
/// Evaluation failures are reported in the body (200, `pending: true`):
/// the answer itself was accepted.
pub async fn submit_answer(
    State(state): State<AppState>,
    Json(request): Json<SubmitAnswerRequest>,
) -> ApiResult<Json<SubmitAnswerResponse>> {
    let outcome = state.orchestrator.submit_answer(request).await?;
    Ok(Json(outcome.into()))
}

/// POST /answers/:answer_id/retry-evaluation
///
/// 503 with `pending: true` if the evaluator is still unavailable.
pub async fn retry_evaluation(
    State(state): State<AppState>,
    Path(answer_id): Path<Uuid>,
) -> ApiResult<Json<RetryEvaluationResponse>> {
    let rating = state.orchestrator.retry_evaluation(answer_id).await?;
    Ok(Json(RetryEvaluationResponse {
        answer_id,
        rating,
        pending: false,
    }))
}

/// Build answer routes
pub fn answer_routes() -> Router<AppState> {
    Router::new()
        .route("/answers", post(submit_answer))
        .route("/answers/:answer_id/retry-evaluation", post(retry_evaluation))
}
