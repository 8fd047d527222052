//! Evaluation Dedupe Gate
//!
//! Keyed in-process registry guaranteeing at most one outstanding evaluator
//! call per answer. The first caller gets an `InFlightGuard`; everyone else
//! either attaches to the in-flight call and shares its outcome, or receives
//! the rating that is already persisted.
//!
//! The registry lock only covers map access. An acquirer claims the slot
//! before its persisted-rating lookup and releases the lock for the lookup;
//! a rating found there completes the slot, so callers attached meanwhile
//! receive it too. A first caller persists its rating before completing its
//! guard, so an acquirer always sees either the in-flight entry or the
//! stored rating.

use starline_common::db::Rating;
use starline_common::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Failure shared with attached waiters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationFailure {
    pub reason: String,
}

impl EvaluationFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The first caller went away without reporting an outcome
    pub fn abandoned() -> Self {
        Self::new("evaluation abandoned")
    }
}

/// Outcome broadcast to attached waiters
pub type SharedOutcome = std::result::Result<Rating, EvaluationFailure>;

type Slot = watch::Sender<Option<SharedOutcome>>;
type Registry = Arc<Mutex<HashMap<Uuid, Slot>>>;

/// Result of `EvaluationGate::acquire`
pub enum Acquisition {
    /// Caller must run the evaluation and complete the guard
    FirstCaller(InFlightGuard),
    /// Another call is in flight; wait for its outcome
    AttachToInFlight(InFlightWaiter),
    /// A rating is already persisted
    AlreadyTerminal(Rating),
}

/// Per-answer evaluation registry
#[derive(Clone, Default)]
pub struct EvaluationGate {
    in_flight: Registry,
}

impl EvaluationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the gate for `answer_id`.
    ///
    /// `lookup_rating` fetches a persisted rating; it runs outside the
    /// registry lock, after the slot for `answer_id` has been claimed.
    pub async fn acquire<F, Fut>(&self, answer_id: Uuid, lookup_rating: F) -> Result<Acquisition>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Rating>>>,
    {
        let guard = {
            let mut in_flight = self.in_flight.lock().await;

            if let Some(slot) = in_flight.get(&answer_id) {
                tracing::debug!(answer_id = %answer_id, "Attaching to in-flight evaluation");
                return Ok(Acquisition::AttachToInFlight(InFlightWaiter {
                    rx: slot.subscribe(),
                }));
            }

            let (tx, _rx) = watch::channel(None);
            in_flight.insert(answer_id, tx);

            InFlightGuard {
                answer_id,
                registry: Arc::clone(&self.in_flight),
                completed: false,
            }
        };

        // Cancelled mid-lookup: the guard's drop releases the slot
        match lookup_rating().await {
            Ok(Some(rating)) => {
                guard.complete(Ok(rating.clone())).await;
                Ok(Acquisition::AlreadyTerminal(rating))
            }
            Ok(None) => Ok(Acquisition::FirstCaller(guard)),
            Err(e) => {
                guard
                    .complete(Err(EvaluationFailure::new(format!("rating lookup failed: {}", e))))
                    .await;
                Err(e)
            }
        }
    }

    /// Number of evaluations currently in flight
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

/// Held by the single caller allowed to invoke the evaluator
pub struct InFlightGuard {
    answer_id: Uuid,
    registry: Registry,
    completed: bool,
}

impl InFlightGuard {
    /// Release the entry and hand `outcome` to every attached waiter.
    ///
    /// A successful rating must already be persisted.
    pub async fn complete(mut self, outcome: SharedOutcome) {
        let slot = self.registry.lock().await.remove(&self.answer_id);
        self.completed = true;
        if let Some(slot) = slot {
            slot.send_replace(Some(outcome));
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        tracing::warn!(answer_id = %self.answer_id, "In-flight evaluation abandoned");

        // Removing the sender wakes waiters with `abandoned`
        match self.registry.try_lock() {
            Ok(mut in_flight) => {
                in_flight.remove(&self.answer_id);
            }
            Err(_) => {
                let registry = Arc::clone(&self.registry);
                let answer_id = self.answer_id;
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        registry.lock().await.remove(&answer_id);
                    });
                }
            }
        }
    }
}

/// Waits for the outcome of another caller's evaluation
pub struct InFlightWaiter {
    rx: watch::Receiver<Option<SharedOutcome>>,
}

impl InFlightWaiter {
    pub async fn wait(mut self) -> SharedOutcome {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return self
                    .rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| Err(EvaluationFailure::abandoned()));
            }
        }
    }
}
