//! Event types for the Starline event system
//!
//! Provides the shared event definitions and EventBus. Events are broadcast
//! in-process and serialized for SSE transmission; they are notifications
//! only and never the source of truth (the database is).

use crate::db::{InterviewState, SubscriptionTier};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A user started a new interview
    InterviewStarted {
        interview_id: Uuid,
        user_id: Uuid,
        total_questions: u32,
        entitlement_tier: SubscriptionTier,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The current question index changed (advance, retreat or jump)
    QuestionIndexChanged {
        interview_id: Uuid,
        old_index: u32,
        new_index: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An answer was persisted (evaluation not yet known)
    AnswerSubmitted {
        interview_id: Uuid,
        question_id: Uuid,
        answer_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The evaluator produced a rating for an answer
    EvaluationCompleted {
        interview_id: Uuid,
        answer_id: Uuid,
        rating_id: Uuid,
        overall_score: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The evaluator call failed; the answer stays pending
    ///
    /// Always retryable via explicit caller action.
    EvaluationFailed {
        interview_id: Uuid,
        answer_id: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Interview reached its terminal state
    InterviewCompleted {
        interview_id: Uuid,
        user_id: Uuid,
        average_score: Option<f64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Interview state changed (Created → InProgress)
    InterviewStateChanged {
        interview_id: Uuid,
        old_state: InterviewState,
        new_state: InterviewState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reservation was denied by policy (expected, not a fault)
    EntitlementDenied {
        user_id: Uuid,
        action: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Billing changed a user's tier
    TierChanged {
        user_id: Uuid,
        old_tier: SubscriptionTier,
        new_tier: SubscriptionTier,
        credited_interviews: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PipelineEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::InterviewStarted { .. } => "InterviewStarted",
            PipelineEvent::QuestionIndexChanged { .. } => "QuestionIndexChanged",
            PipelineEvent::AnswerSubmitted { .. } => "AnswerSubmitted",
            PipelineEvent::EvaluationCompleted { .. } => "EvaluationCompleted",
            PipelineEvent::EvaluationFailed { .. } => "EvaluationFailed",
            PipelineEvent::InterviewCompleted { .. } => "InterviewCompleted",
            PipelineEvent::InterviewStateChanged { .. } => "InterviewStateChanged",
            PipelineEvent::EntitlementDenied { .. } => "EntitlementDenied",
            PipelineEvent::TierChanged { .. } => "TierChanged",
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Cloning is cheap; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
