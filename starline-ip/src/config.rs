//! Configuration resolution for starline-ip
//!
//! Evaluator API key priority: ENV → TOML. Tunables that can change at
//! runtime (lock wait) come from the database settings table.

use sqlx::SqlitePool;
use starline_common::config::{AnswerLimits, PricingConfig, TomlConfig};
use starline_common::db::setting_i64;
use starline_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::services::{Evaluator, HttpEvaluator, UnconfiguredEvaluator};

/// Environment variable holding the evaluator API key
pub const EVALUATOR_API_KEY_ENV: &str = "STARLINE_EVALUATOR_API_KEY";

/// Default starter access window after a purchase
pub const DEFAULT_STARTER_ACCESS_DAYS: i64 = 365;

/// Upper bound for `total_questions` of one interview
pub const MAX_QUESTIONS_PER_INTERVIEW: u32 = 50;

const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Resolved pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub answer_limits: AnswerLimits,
    pub pricing: PricingConfig,
    pub evaluator_timeout: Duration,
    /// Total retry budget for conflicting writes
    pub max_lock_wait_ms: u64,
    pub starter_access_days: i64,
    pub max_questions: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_toml(&TomlConfig::default(), DEFAULT_MAX_LOCK_WAIT_MS)
    }
}

impl PipelineSettings {
    pub fn from_toml(toml_config: &TomlConfig, max_lock_wait_ms: u64) -> Self {
        Self {
            answer_limits: toml_config.answers,
            pricing: toml_config.pricing.clone(),
            evaluator_timeout: Duration::from_millis(toml_config.evaluator.timeout_ms),
            max_lock_wait_ms,
            starter_access_days: toml_config
                .starter_access_days
                .unwrap_or(DEFAULT_STARTER_ACCESS_DAYS),
            max_questions: MAX_QUESTIONS_PER_INTERVIEW,
        }
    }

    /// TOML settings plus `database_max_lock_wait_ms` from the settings table
    pub async fn load(db: &SqlitePool, toml_config: &TomlConfig) -> Result<Self> {
        let max_lock_wait_ms = setting_i64(db, "database_max_lock_wait_ms")
            .await?
            .filter(|ms| *ms > 0)
            .map(|ms| ms as u64)
            .unwrap_or(DEFAULT_MAX_LOCK_WAIT_MS);

        Ok(Self::from_toml(toml_config, max_lock_wait_ms))
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the evaluator API key
///
/// **Priority:** ENV → TOML
pub fn resolve_evaluator_api_key(toml_config: &TomlConfig) -> Option<String> {
    let env_key = std::env::var(EVALUATOR_API_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .evaluator
        .api_key
        .clone()
        .filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Evaluator API key found in environment and TOML. Using environment (highest priority).");
    }

    if let Some(key) = env_key {
        info!("Evaluator API key loaded from environment variable");
        return Some(key);
    }
    if let Some(key) = toml_key {
        info!("Evaluator API key loaded from TOML config");
        return Some(key);
    }
    None
}

/// Build the evaluator from configuration.
///
/// Without an endpoint and key, answers are stored but stay pending.
pub fn build_evaluator(toml_config: &TomlConfig) -> Arc<dyn Evaluator> {
    let endpoint = toml_config
        .evaluator
        .endpoint
        .clone()
        .filter(|e| !e.trim().is_empty());
    let api_key = resolve_evaluator_api_key(toml_config);

    match (endpoint, api_key) {
        (Some(endpoint), Some(api_key)) => {
            match HttpEvaluator::new(endpoint, api_key, toml_config.evaluator.model.clone()) {
                Ok(evaluator) => {
                    info!("Evaluator endpoint: {}", evaluator.endpoint());
                    Arc::new(evaluator)
                }
                Err(e) => {
                    warn!("Failed to create evaluator client: {}", e);
                    Arc::new(UnconfiguredEvaluator)
                }
            }
        }
        (endpoint, api_key) => {
            warn!(
                endpoint_configured = endpoint.is_some(),
                api_key_configured = api_key.is_some(),
                "Evaluator not configured; answers will stay pending. Configure using:\n\
                 1. TOML config: [evaluator] endpoint = \"https://...\"\n\
                 2. Environment: {}=your-key-here (or [evaluator] api_key in TOML)",
                EVALUATOR_API_KEY_ENV
            );
            Arc::new(UnconfiguredEvaluator)
        }
    }
}
