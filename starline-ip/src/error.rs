//! Error types for starline-ip
//!
//! Maps pipeline outcomes onto HTTP statuses. Entitlement denials and
//! duplicate answers are never 5xx; only evaluator unavailability is
//! reported as retryable.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::{Denial, PipelineError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Entitlement exhausted (402), carries the upgrade hint
    #[error("{0}")]
    PaymentRequired(Denial),

    /// Operation does not apply to the current state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Evaluator unavailable (503, retryable)
    #[error("Evaluator unavailable for answer {answer_id}: {reason}")]
    EvaluatorUnavailable { answer_id: Uuid, reason: String },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// starline-common error
    #[error("Common error: {0}")]
    Common(#[source] starline_common::Error),
}

impl From<starline_common::Error> for ApiError {
    fn from(err: starline_common::Error) -> Self {
        match err {
            starline_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            starline_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Common(other),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => ApiError::BadRequest(msg),
            PipelineError::EntitlementDenied(denial) => ApiError::PaymentRequired(denial),
            PipelineError::NotFound(msg) => ApiError::NotFound(msg),
            PipelineError::InvalidState(msg) => ApiError::Conflict(msg),
            PipelineError::EvaluatorUnavailable { answer_id, reason } => {
                ApiError::EvaluatorUnavailable { answer_id, reason }
            }
            PipelineError::Storage(err) => ApiError::from(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::PaymentRequired(_) => (StatusCode::PAYMENT_REQUIRED, "ENTITLEMENT_DENIED"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            ApiError::EvaluatorUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "EVALUATOR_UNAVAILABLE")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR"),
        };

        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(code = error_code, "{}", message);
        }

        let retryable = matches!(self, ApiError::EvaluatorUnavailable { .. });
        let error = json!({
            "code": error_code,
            "message": message,
            "retryable": retryable,
        });

        let body = match self {
            ApiError::PaymentRequired(denial) => json!({
                "denied": true,
                "action": denial.action,
                "reason": denial.reason,
                "upgrade_hint": denial.upgrade_hint,
                "error": error,
            }),
            ApiError::EvaluatorUnavailable { answer_id, .. } => json!({
                "answer_id": answer_id,
                "pending": true,
                "error": error,
            }),
            _ => json!({ "error": error }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{DenialReason, EntitlementAction, UpgradeHint};
    use http_body_util::BodyExt;
    use starline_common::db::SubscriptionTier;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_denial_is_402_with_upgrade_hint() {
        let err = ApiError::from(PipelineError::EntitlementDenied(Denial {
            action: EntitlementAction::SubmitAnswer,
            reason: DenialReason::FreeAnswerLimitReached,
            upgrade_hint: Some(UpgradeHint {
                target_tier: SubscriptionTier::Starter,
                price_delta_cents: 4900,
                currency: "EUR".to_string(),
            }),
        }));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let body = body_json(response).await;
        assert_eq!(body["denied"], true);
        assert_eq!(body["reason"], "FREE_ANSWER_LIMIT_REACHED");
        assert_eq!(body["upgrade_hint"]["target_tier"], "starter");
        assert_eq!(body["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn test_evaluator_unavailable_is_retryable_503() {
        let err = ApiError::from(PipelineError::EvaluatorUnavailable {
            answer_id: Uuid::new_v4(),
            reason: "timeout".to_string(),
        });

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(body["pending"], true);
        assert_eq!(body["error"]["code"], "EVALUATOR_UNAVAILABLE");
        assert_eq!(body["error"]["retryable"], true);
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (PipelineError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (PipelineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (PipelineError::InvalidState("x".into()), StatusCode::CONFLICT),
            (
                PipelineError::Storage(starline_common::Error::Internal("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
