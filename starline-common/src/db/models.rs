//! Database models
//!
//! Persisted entities of the interview pipeline. Ids are UUIDv4 stored as
//! TEXT, timestamps are RFC 3339 TEXT.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Subscription tier
///
/// Ordered: `Free < Starter < Premium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Starter,
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Premium => "premium",
        }
    }

    /// Next tier up, if any
    pub fn upgrade_target(&self) -> Option<SubscriptionTier> {
        match self {
            SubscriptionTier::Free => Some(SubscriptionTier::Starter),
            SubscriptionTier::Starter => Some(SubscriptionTier::Premium),
            SubscriptionTier::Premium => None,
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "starter" => Ok(SubscriptionTier::Starter),
            "premium" => Ok(SubscriptionTier::Premium),
            other => Err(Error::Internal(format!("Unknown subscription tier: {}", other))),
        }
    }
}

/// Interview lifecycle state: Created → InProgress → Completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewState {
    /// Questions generated, nothing answered yet
    Created,
    /// At least one answer persisted
    InProgress,
    /// Terminal
    Completed,
}

impl InterviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewState::Created => "created",
            InterviewState::InProgress => "in_progress",
            InterviewState::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InterviewState::Completed)
    }
}

impl FromStr for InterviewState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(InterviewState::Created),
            "in_progress" => Ok(InterviewState::InProgress),
            "completed" => Ok(InterviewState::Completed),
            other => Err(Error::Internal(format!("Unknown interview state: {}", other))),
        }
    }
}

/// Question difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(Error::Internal(format!("Unknown difficulty: {}", other))),
        }
    }
}

/// User with entitlement counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub tier: SubscriptionTier,
    pub free_answers_used: u32,
    pub free_interviews_used: u32,
    pub starter_interviews_used: u32,
    /// Starter interviews purchased so far (accumulates across purchases)
    pub starter_interview_credits: u32,
    pub starter_expires_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency version, bumped on every counter write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// New free-tier user with zeroed counters
    pub fn new_free() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tier: SubscriptionTier::Free,
            free_answers_used: 0,
            free_interviews_used: 0,
            starter_interviews_used: 0,
            starter_interview_credits: 0,
            starter_expires_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Starter access has lapsed at `now`
    pub fn starter_expired(&self, now: DateTime<Utc>) -> bool {
        self.starter_expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// Interview aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interview {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_questions: u32,
    pub current_question_index: u32,
    /// Highest index ever reached; bounds JumpTo and answerable questions
    pub furthest_question_index: u32,
    /// Number of answers with a rating
    pub completed_question_count: u32,
    pub average_score: Option<f64>,
    pub state: InterviewState,
    /// Tier whose allowance paid for this interview
    pub entitlement_tier: SubscriptionTier,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Interview {
    pub fn new(user_id: Uuid, total_questions: u32, entitlement_tier: SubscriptionTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            total_questions,
            current_question_index: 0,
            furthest_question_index: 0,
            completed_question_count: 0,
            average_score: None,
            state: InterviewState::Created,
            entitlement_tier,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn last_index(&self) -> u32 {
        self.total_questions.saturating_sub(1)
    }
}

/// Pre-generated interview question (immutable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub interview_id: Uuid,
    /// 0-based position within the interview
    pub ordinal: u32,
    pub competency: String,
    pub text: String,
    pub difficulty: Difficulty,
}

/// A user's answer to one question; unique per (interview_id, question_id)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub interview_id: Uuid,
    pub question_id: Uuid,
    pub text: String,
    pub time_spent_seconds: u32,
    pub answered_at: DateTime<Utc>,
}

/// Per-component STAR scores, each in [0, 10]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StarBreakdown {
    pub situation: f64,
    pub task: f64,
    pub action: f64,
    pub result: f64,
}

/// Evaluator verdict for one answer; at most one per answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub answer_id: Uuid,
    /// In [0, 10], fractional allowed
    pub overall_score: f64,
    pub competency_scores: BTreeMap<String, f64>,
    pub star_breakdown: StarBreakdown,
    pub feedback: String,
    pub strengths: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub improved_answer: String,
    pub rated_at: DateTime<Utc>,
}
