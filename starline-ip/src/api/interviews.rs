//! Interview handlers
//!
//! POST /interviews, GET /interviews/:id, GET /interviews/:id/{questions,ratings},
//! POST /interviews/:id/{advance,retreat,jump}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use starline_common::db::{Interview, Question, Rating};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::{BlockReason, InterviewStateView, QuestionInput, StepOutcome, StepResult};
use crate::AppState;

/// POST /interviews request
#[derive(Debug, Deserialize)]
pub struct StartInterviewRequest {
    pub user_id: Uuid,
    pub total_questions: u32,
    /// Replaces catalogue generation; length must equal `total_questions`
    #[serde(default)]
    pub questions: Option<Vec<QuestionInput>>,
}

/// POST /interviews response
#[derive(Debug, Serialize)]
pub struct StartInterviewResponse {
    pub interview: Interview,
    pub questions: Vec<Question>,
}

/// POST /interviews/:id/jump request
#[derive(Debug, Deserialize)]
pub struct JumpRequest {
    pub index: u32,
}

/// Sequencer response
#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub interview_id: Uuid,
    pub current_question_index: u32,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<BlockReason>,
    /// True only for the call that completed the interview
    pub completed: bool,
}

impl From<StepOutcome> for StepResponse {
    fn from(outcome: StepOutcome) -> Self {
        let reason = match outcome.result {
            StepResult::Blocked(reason) => Some(reason),
            _ => None,
        };
        Self {
            interview_id: outcome.interview_id,
            current_question_index: outcome.current_question_index,
            blocked: outcome.blocked(),
            reason,
            completed: matches!(outcome.result, StepResult::Completed),
        }
    }
}

/// POST /interviews
///
/// Returns 201 Created, or 402 with an upgrade hint when the allowance is used.
pub async fn start_interview(
    State(state): State<AppState>,
    Json(request): Json<StartInterviewRequest>,
) -> ApiResult<(StatusCode, Json<StartInterviewResponse>)> {
    let started = state
        .lifecycle
        .start_interview(request.user_id, request.total_questions, request.questions)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(StartInterviewResponse {
            interview: started.interview,
            questions: started.questions,
        }),
    ))
}

/// GET /interviews/:id
pub async fn get_interview_state(
    State(state): State<AppState>,
    Path(interview_id): Path<Uuid>,
) -> ApiResult<Json<InterviewStateView>> {
    Ok(Json(state.lifecycle.interview_state(interview_id).await?))
}

/// GET /interviews/:id/questions
pub async fn list_questions(
    State(state): State<AppState>,
    Path(interview_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Question>>> {
    Ok(Json(state.lifecycle.list_questions(interview_id).await?))
}

/// GET /interviews/:id/ratings
pub async fn list_ratings(
    State(state): State<AppState>,
    Path(interview_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Rating>>> {
    Ok(Json(state.lifecycle.list_ratings(interview_id).await?))
}

/// POST /interviews/:id/advance
pub async fn advance(
    State(state): State<AppState>,
    Path(interview_id): Path<Uuid>,
) -> ApiResult<Json<StepResponse>> {
    Ok(Json(state.sequencer.advance(interview_id).await?.into()))
}

/// POST /interviews/:id/retreat
pub async fn retreat(
    State(state): State<AppState>,
    Path(interview_id): Path<Uuid>,
) -> ApiResult<Json<StepResponse>> {
    Ok(Json(state.sequencer.retreat(interview_id).await?.into()))
}

/// POST /interviews/:id/jump
pub async fn jump(
    State(state): State<AppState>,
    Path(interview_id): Path<Uuid>,
    Json(request): Json<JumpRequest>,
) -> ApiResult<Json<StepResponse>> {
    Ok(Json(
        state.sequencer.jump_to(interview_id, request.index).await?.into(),
    ))
}

/// Build interview routes
pub fn interview_routes() -> Router<AppState> {
    Router::new()
        .route("/interviews", post(start_interview))
        .route("/interviews/:id", get(get_interview_state))
        .route("/interviews/:id/questions", get(list_questions))
        .route("/interviews/:id/ratings", get(list_ratings))
        .route("/interviews/:id/advance", post(advance))
        .route("/interviews/:id/retreat", post(retreat))
        .route("/interviews/:id/jump", post(jump))
}
