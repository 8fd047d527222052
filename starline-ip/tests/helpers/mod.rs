//! Shared test fixtures: temp database, scripted evaluator, app state

#![allow(dead_code)]

use async_trait::async_trait;
use starline_common::db::{init_database, SubscriptionTier, User};
use starline_common::events::EventBus;
use starline_ip::services::{
    EvaluationRequest, Evaluator, EvaluatorError, RatingFields, StarScores, TierChange,
};
use starline_ip::{AppState, PipelineSettings};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const ANSWER_TEXT: &str =
    "I led the database migration, split the work into phases and cut p99 latency by 40%.";

/// Evaluator with scripted behaviour, counting its calls
pub struct ScriptedEvaluator {
    calls: AtomicUsize,
    scores: Vec<f64>,
    fail_first: usize,
    delay: Duration,
    delayed_calls: usize,
}

impl ScriptedEvaluator {
    /// Always succeeds; scores are used in call order, cycling
    pub fn scoring(scores: &[f64]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            scores: scores.to_vec(),
            fail_first: 0,
            delay: Duration::ZERO,
            delayed_calls: 0,
        }
    }

    /// First `n` calls fail with HTTP 503
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// First `calls` calls sleep for `delay` before answering
    pub fn slow(mut self, delay: Duration, calls: usize) -> Self {
        self.delay = delay;
        self.delayed_calls = calls;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        _timeout: Duration,
    ) -> Result<RatingFields, EvaluatorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if call < self.delayed_calls {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.fail_first {
            return Err(EvaluatorError::Overloaded(503));
        }

        let score = self.scores[call % self.scores.len()];
        let mut competency_scores = BTreeMap::new();
        competency_scores.insert(request.competency.clone(), score);

        Ok(RatingFields {
            overall_score: score,
            competency_scores,
            star_breakdown: StarScores {
                situation: score,
                task: score,
                action: score,
                result: score,
            },
            feedback: "Clear situation, quantify the result.".to_string(),
            strengths: vec!["structure".to_string()],
            improvement_areas: vec!["metrics".to_string()],
            improved_answer: request.answer.clone(),
        })
    }
}

pub struct TestPipeline {
    pub state: AppState,
    pub evaluator: Arc<ScriptedEvaluator>,
    _temp_dir: TempDir,
}

pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        evaluator_timeout: Duration::from_secs(5),
        max_lock_wait_ms: 10_000,
        ..PipelineSettings::default()
    }
}

pub async fn setup(evaluator: ScriptedEvaluator) -> TestPipeline {
    setup_with(evaluator, fast_settings()).await
}

pub async fn setup_with(evaluator: ScriptedEvaluator, settings: PipelineSettings) -> TestPipeline {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("starline.db")).await.unwrap();
    let evaluator = Arc::new(evaluator);

    let state = AppState::new(
        pool,
        EventBus::new(256),
        evaluator.clone(),
        settings,
        CancellationToken::new(),
    );

    TestPipeline {
        state,
        evaluator,
        _temp_dir: temp_dir,
    }
}

impl TestPipeline {
    pub async fn free_user(&self) -> User {
        self.state.ledger.register_user().await.unwrap()
    }

    pub async fn starter_user(&self, credits: u32) -> User {
        let user = self.free_user().await;
        self.state
            .ledger
            .set_tier(&TierChange {
                user_id: user.id,
                tier: SubscriptionTier::Starter,
                credited_interviews: credits,
                starter_expires_at: None,
            })
            .await
            .unwrap()
    }

    pub async fn premium_user(&self) -> User {
        let user = self.free_user().await;
        self.state
            .ledger
            .set_tier(&TierChange {
                user_id: user.id,
                tier: SubscriptionTier::Premium,
                credited_interviews: 0,
                starter_expires_at: None,
            })
            .await
            .unwrap()
    }
}
