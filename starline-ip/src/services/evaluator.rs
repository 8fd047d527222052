//! Evaluator client
//!
//! The `Evaluator` trait is the seam to the external answer-scoring service.
//! `HttpEvaluator` speaks JSON over HTTP; responses are parsed into the
//! strict `RatingFields` schema and range-checked, anything else is
//! `EvaluatorError::Malformed`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use starline_common::db::{Rating, StarBreakdown};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const USER_AGENT: &str = concat!("starline-ip/", env!("CARGO_PKG_VERSION"));

/// Upstream error bodies are read up to this many bytes
const ERROR_BODY_READ_LIMIT: usize = 4096;

/// Characters of an upstream error body kept in `EvaluatorError::Upstream`
const ERROR_EXCERPT_CHARS: usize = 200;

/// Lowest and highest valid score
pub const SCORE_RANGE: (f64, f64) = (0.0, 10.0);

/// Evaluator errors
///
/// All variants surface to callers as `PipelineError::EvaluatorUnavailable`.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),

    /// 429 / 503 from upstream
    #[error("Evaluator overloaded (HTTP {0})")]
    Overloaded(u16),

    #[error("Evaluator error {0}: {1}")]
    Upstream(u16, String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed evaluation: {0}")]
    Malformed(String),

    #[error("Evaluator not configured")]
    NotConfigured,

    #[error("Evaluation cancelled by shutdown")]
    Cancelled,
}

/// Input to one evaluation
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest {
    pub question: String,
    pub competency: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// STAR component scores as returned by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StarScores {
    pub situation: f64,
    pub task: f64,
    pub action: f64,
    pub result: f64,
}

/// Evaluator response schema (unknown fields rejected)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatingFields {
    pub overall_score: f64,
    #[serde(default)]
    pub competency_scores: BTreeMap<String, f64>,
    pub star_breakdown: StarScores,
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvement_areas: Vec<String>,
    pub improved_answer: String,
}

fn check_score(name: &str, value: f64) -> Result<(), EvaluatorError> {
    if value.is_finite() && value >= SCORE_RANGE.0 && value <= SCORE_RANGE.1 {
        Ok(())
    } else {
        Err(EvaluatorError::Malformed(format!(
            "{} out of range [0, 10]: {}",
            name, value
        )))
    }
}

impl RatingFields {
    /// Range-check every score and require non-empty feedback
    pub fn validate(&self) -> Result<(), EvaluatorError> {
        check_score("overall_score", self.overall_score)?;
        for (competency, score) in &self.competency_scores {
            check_score(competency, *score)?;
        }
        check_score("star_breakdown.situation", self.star_breakdown.situation)?;
        check_score("star_breakdown.task", self.star_breakdown.task)?;
        check_score("star_breakdown.action", self.star_breakdown.action)?;
        check_score("star_breakdown.result", self.star_breakdown.result)?;

        if self.feedback.trim().is_empty() {
            return Err(EvaluatorError::Malformed("feedback is empty".to_string()));
        }
        Ok(())
    }

    /// Bind to an answer as a new Rating
    pub fn into_rating(self, answer_id: Uuid) -> Rating {
        Rating {
            id: Uuid::new_v4(),
            answer_id,
            overall_score: self.overall_score,
            competency_scores: self.competency_scores,
            star_breakdown: StarBreakdown {
                situation: self.star_breakdown.situation,
                task: self.star_breakdown.task,
                action: self.star_breakdown.action,
                result: self.star_breakdown.result,
            },
            feedback: self.feedback,
            strengths: self.strengths,
            improvement_areas: self.improvement_areas,
            improved_answer: self.improved_answer,
            rated_at: Utc::now(),
        }
    }
}

/// Scores one free-text answer
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluator name for logs
    fn name(&self) -> &'static str;

    /// Evaluate an answer; implementations should give up after `timeout`
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        timeout: Duration,
    ) -> Result<RatingFields, EvaluatorError>;
}

/// HTTP evaluator: `POST {endpoint}` with a bearer key
pub struct HttpEvaluator {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: Option<String>,
}

impl HttpEvaluator {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: Option<String>,
    ) -> Result<Self, EvaluatorError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EvaluatorError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint,
            api_key,
            model,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        timeout: Duration,
    ) -> Result<RatingFields, EvaluatorError> {
        let mut body = request.clone();
        if body.model.is_none() {
            body.model = self.model.clone();
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            competency = %request.competency,
            "Requesting answer evaluation"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EvaluatorError::Timeout(timeout)
                } else {
                    EvaluatorError::Network(e.to_string())
                }
            })?;

        let status = response.status();

        if status == 429 || status == 503 {
            return Err(EvaluatorError::Overloaded(status.as_u16()));
        }

        if !status.is_success() {
            let body = read_error_body(response).await;
            tracing::warn!(
                endpoint = %self.endpoint,
                status = status.as_u16(),
                body = %body,
                "Evaluator returned an error"
            );
            return Err(EvaluatorError::Upstream(status.as_u16(), excerpt(&body)));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                EvaluatorError::Timeout(timeout)
            } else {
                EvaluatorError::Network(e.to_string())
            }
        })?;

        let fields: RatingFields = serde_json::from_slice(&bytes)
            .map_err(|e| EvaluatorError::Malformed(e.to_string()))?;
        fields.validate()?;

        tracing::info!(
            overall_score = fields.overall_score,
            "Evaluation received"
        );

        Ok(fields)
    }
}

/// Read at most `ERROR_BODY_READ_LIMIT` bytes of an error response
async fn read_error_body(mut response: reqwest::Response) -> String {
    let mut buf = Vec::new();
    while buf.len() < ERROR_BODY_READ_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(ERROR_BODY_READ_LIMIT);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Client-facing excerpt of an upstream error body
fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= ERROR_EXCERPT_CHARS {
        return body.to_string();
    }
    let mut short: String = body.chars().take(ERROR_EXCERPT_CHARS).collect();
    short.push_str("...");
    short
}

/// Stand-in when no endpoint is configured: every call fails, answers stay
/// pending until an evaluator is configured and evaluation is retried.
#[derive(Debug, Default)]
pub struct UnconfiguredEvaluator;

#[async_trait]
impl Evaluator for UnconfiguredEvaluator {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn evaluate(
        &self,
        _request: &EvaluationRequest,
        _timeout: Duration,
    ) -> Result<RatingFields, EvaluatorError> {
        Err(EvaluatorError::NotConfigured)
    }
}
