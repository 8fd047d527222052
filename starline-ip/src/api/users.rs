//! User registration, entitlement and billing handlers
//!
//! POST /users, GET /users/:user_id/entitlement, POST /billing/tier

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use starline_common::db::{SubscriptionTier, User};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::{EntitlementView, TierChange};
use crate::AppState;

/// User as exposed over HTTP
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user_id: Uuid,
    pub tier: SubscriptionTier,
    pub free_answers_used: u32,
    pub free_interviews_used: u32,
    pub starter_interviews_used: u32,
    pub starter_interview_credits: u32,
    pub starter_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            tier: user.tier,
            free_answers_used: user.free_answers_used,
            free_interviews_used: user.free_interviews_used,
            starter_interviews_used: user.starter_interviews_used,
            starter_interview_credits: user.starter_interview_credits,
            starter_expires_at: user.starter_expires_at,
            created_at: user.created_at,
        }
    }
}

/// POST /users
///
/// Register a free-tier user. Returns 201 Created.
pub async fn create_user(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let user = state.ledger.register_user().await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// GET /users/:user_id/entitlement
pub async fn get_entitlement(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<EntitlementView>> {
    let view = state.ledger.entitlement(user_id).await?;
    Ok(Json(view))
}

/// POST /billing/tier
///
/// Billing webhook: replace tier, add starter credits, set expiry.
pub async fn set_tier(
    State(state): State<AppState>,
    Json(change): Json<TierChange>,
) -> ApiResult<Json<UserResponse>> {
    let user = state.ledger.set_tier(&change).await?;
    Ok(Json(user.into()))
}

/// Build user and billing routes
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/:user_id/entitlement", get(get_entitlement))
        .route("/billing/tier", post(set_tier))
}
