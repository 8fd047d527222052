//! starline-ip library interface
//!
//! Interview Pipeline service: entitlement-gated answer submission, question
//! sequencing and deduplicated answer evaluation. Exposes the router and
//! services for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod utils;

pub use crate::config::PipelineSettings;
pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use starline_common::events::EventBus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::services::orchestrator::OrchestratorSettings;
use crate::services::{
    AnswerOrchestrator, EntitlementLedger, EvaluationGate, Evaluator, InterviewLifecycle,
    QuestionSequencer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub ledger: Arc<EntitlementLedger>,
    pub lifecycle: Arc<InterviewLifecycle>,
    pub sequencer: Arc<QuestionSequencer>,
    pub orchestrator: Arc<AnswerOrchestrator>,
    /// Cancelled on shutdown; aborts in-flight evaluator waits
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        evaluator: Arc<dyn Evaluator>,
        settings: PipelineSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let ledger = Arc::new(EntitlementLedger::new(
            db.clone(),
            event_bus.clone(),
            settings.pricing.clone(),
            settings.max_lock_wait_ms,
            settings.starter_access_days,
        ));
        let lifecycle = Arc::new(InterviewLifecycle::new(
            db.clone(),
            event_bus.clone(),
            Arc::clone(&ledger),
            settings.max_questions,
        ));
        let sequencer = Arc::new(QuestionSequencer::new(
            db.clone(),
            event_bus.clone(),
            Arc::clone(&lifecycle),
            settings.max_lock_wait_ms,
        ));
        let orchestrator = Arc::new(AnswerOrchestrator::new(
            db.clone(),
            event_bus.clone(),
            Arc::clone(&ledger),
            Arc::clone(&lifecycle),
            EvaluationGate::new(),
            evaluator,
            OrchestratorSettings {
                answer_limits: settings.answer_limits,
                evaluator_timeout: settings.evaluator_timeout,
                max_lock_wait_ms: settings.max_lock_wait_ms,
            },
            shutdown.clone(),
        ));

        Self {
            db,
            event_bus,
            ledger,
            lifecycle,
            sequencer,
            orchestrator,
            shutdown,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::user_routes())
        .merge(api::interview_routes())
        .merge(api::answer_routes())
        .route("/events", get(api::event_stream))
        .route("/api/buildinfo", get(api::get_build_info))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
