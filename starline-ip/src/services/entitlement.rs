//! Entitlement Ledger
//!
//! Single entry point for per-user consumption counters. Every counter write
//! goes through a version-checked update of the `users` row, so concurrent
//! reservations by one user can never exceed the tier's limit.
//!
//! **Limits per tier:**
//!
//! | Tier    | SubmitAnswer                          | StartInterview                   |
//! |---------|---------------------------------------|----------------------------------|
//! | free    | 1 answer, lifetime                    | 1 interview, lifetime            |
//! | starter | unlimited within purchased interviews | 1 per purchased credit           |
//! | premium | unlimited                             | unlimited                        |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use starline_common::config::PricingConfig;
use starline_common::db::{SubscriptionTier, User};
use starline_common::events::{EventBus, PipelineEvent};
use starline_common::{Error, Result};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::users;
use crate::utils::retry_on_conflict;

/// Lifetime answer allowance of the free tier
pub const FREE_ANSWER_LIMIT: u32 = 1;

/// Lifetime interview allowance of the free tier
pub const FREE_INTERVIEW_LIMIT: u32 = 1;

/// Metered action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementAction {
    SubmitAnswer,
    StartInterview,
}

impl EntitlementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementAction::SubmitAnswer => "submit_answer",
            EntitlementAction::StartInterview => "start_interview",
        }
    }
}

/// Why a reservation was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    FreeAnswerLimitReached,
    FreeInterviewLimitReached,
    StarterExpired,
    StarterCreditsExhausted,
    /// Starter user answering in an interview paid for by the free allowance
    InterviewNotCovered,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::FreeAnswerLimitReached => "FREE_ANSWER_LIMIT_REACHED",
            DenialReason::FreeInterviewLimitReached => "FREE_INTERVIEW_LIMIT_REACHED",
            DenialReason::StarterExpired => "STARTER_EXPIRED",
            DenialReason::StarterCreditsExhausted => "STARTER_CREDITS_EXHAUSTED",
            DenialReason::InterviewNotCovered => "INTERVIEW_NOT_COVERED",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            DenialReason::FreeAnswerLimitReached => "free tier answer allowance used",
            DenialReason::FreeInterviewLimitReached => "free tier interview allowance used",
            DenialReason::StarterExpired => "starter access has expired",
            DenialReason::StarterCreditsExhausted => "no starter interview credits left",
            DenialReason::InterviewNotCovered => "interview is not covered by the starter purchase",
        }
    }
}

/// Suggested upgrade attached to a denial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeHint {
    pub target_tier: SubscriptionTier,
    /// Price difference to the user's current tier, in minor units
    pub price_delta_cents: i64,
    pub currency: String,
}

/// A policy denial (expected outcome, not a fault)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub action: EntitlementAction,
    pub reason: DenialReason,
    pub upgrade_hint: Option<UpgradeHint>,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} denied: {}", self.action.as_str(), self.reason.message())
    }
}

/// Result of `reserve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// Allowed; `covered_by` is the tier whose allowance pays for the action
    Allowed { covered_by: SubscriptionTier },
    Denied(Denial),
}

/// Counter consumed by an allowed reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    FreeAnswers,
    FreeInterviews,
    StarterInterviews,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Grant {
    covered_by: SubscriptionTier,
    consumes: Option<Counter>,
}

/// Pure policy decision for `user` at `now`.
///
/// `interview_tier` is the paying tier of the target interview and only
/// matters for `SubmitAnswer`; `None` is treated as a free-paid interview.
fn decide(
    user: &User,
    action: EntitlementAction,
    interview_tier: Option<SubscriptionTier>,
    now: DateTime<Utc>,
) -> std::result::Result<Grant, DenialReason> {
    use EntitlementAction::*;
    use SubscriptionTier::*;

    match (user.tier, action) {
        (Premium, _) => Ok(Grant {
            covered_by: Premium,
            consumes: None,
        }),

        (Starter, SubmitAnswer) => {
            if user.starter_expired(now) {
                return Err(DenialReason::StarterExpired);
            }
            match interview_tier {
                Some(tier @ (Starter | Premium)) => Ok(Grant {
                    covered_by: tier,
                    consumes: None,
                }),
                _ => Err(DenialReason::InterviewNotCovered),
            }
        }
        (Starter, StartInterview) => {
            if user.starter_expired(now) {
                Err(DenialReason::StarterExpired)
            } else if user.starter_interviews_used < user.starter_interview_credits {
                Ok(Grant {
                    covered_by: Starter,
                    consumes: Some(Counter::StarterInterviews),
                })
            } else {
                Err(DenialReason::StarterCreditsExhausted)
            }
        }

        (Free, SubmitAnswer) => {
            if user.free_answers_used < FREE_ANSWER_LIMIT {
                Ok(Grant {
                    covered_by: Free,
                    consumes: Some(Counter::FreeAnswers),
                })
            } else {
                Err(DenialReason::FreeAnswerLimitReached)
            }
        }
        (Free, StartInterview) => {
            if user.free_interviews_used < FREE_INTERVIEW_LIMIT {
                Ok(Grant {
                    covered_by: Free,
                    consumes: Some(Counter::FreeInterviews),
                })
            } else {
                Err(DenialReason::FreeInterviewLimitReached)
            }
        }
    }
}

fn tier_price_cents(tier: SubscriptionTier, pricing: &PricingConfig) -> i64 {
    match tier {
        SubscriptionTier::Free => 0,
        SubscriptionTier::Starter => pricing.starter_price_cents,
        SubscriptionTier::Premium => pricing.premium_price_cents,
    }
}

/// Upgrade suggestion for a user currently on `tier`
pub fn upgrade_hint(tier: SubscriptionTier, pricing: &PricingConfig) -> Option<UpgradeHint> {
    let target = tier.upgrade_target()?;
    Some(UpgradeHint {
        target_tier: target,
        price_delta_cents: tier_price_cents(target, pricing) - tier_price_cents(tier, pricing),
        currency: pricing.currency.clone(),
    })
}

/// Billing change applied by `set_tier`
#[derive(Debug, Clone, Deserialize)]
pub struct TierChange {
    pub user_id: Uuid,
    pub tier: SubscriptionTier,
    /// Starter interviews added by this purchase
    #[serde(default)]
    pub credited_interviews: u32,
    /// Replaces the starter expiry when present
    #[serde(default)]
    pub starter_expires_at: Option<DateTime<Utc>>,
}

/// Entitlement read model
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementView {
    pub user_id: Uuid,
    pub tier: SubscriptionTier,
    pub free_answers_used: u32,
    pub free_interviews_used: u32,
    pub starter_interviews_used: u32,
    pub starter_interview_credits: u32,
    pub starter_expires_at: Option<DateTime<Utc>>,
    pub starter_expired: bool,
    /// `None` means unlimited
    pub answers_remaining: Option<u32>,
    /// `None` means unlimited
    pub interviews_remaining: Option<u32>,
    pub upgrade_hint: Option<UpgradeHint>,
}

/// Entitlement Ledger service
pub struct EntitlementLedger {
    db: SqlitePool,
    event_bus: EventBus,
    pricing: PricingConfig,
    max_lock_wait_ms: u64,
    starter_access_days: i64,
}

impl EntitlementLedger {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        pricing: PricingConfig,
        max_lock_wait_ms: u64,
        starter_access_days: i64,
    ) -> Self {
        Self {
            db,
            event_bus,
            pricing,
            max_lock_wait_ms,
            starter_access_days,
        }
    }

    pub fn max_lock_wait_ms(&self) -> u64 {
        self.max_lock_wait_ms
    }

    /// Register a new free-tier user
    pub async fn register_user(&self) -> Result<User> {
        let user = User::new_free();
        users::insert_user(&self.db, &user).await?;
        info!(user_id = %user.id, "Registered free-tier user");
        Ok(user)
    }

    /// Atomic check-and-increment in its own transaction.
    ///
    /// Retries on version conflicts and SQLite busy errors; emits
    /// `EntitlementDenied` on denial.
    pub async fn reserve(
        &self,
        user_id: Uuid,
        action: EntitlementAction,
        interview_tier: Option<SubscriptionTier>,
    ) -> Result<Reservation> {
        let reservation = retry_on_conflict("entitlement_reserve", self.max_lock_wait_ms, || async move {
            let mut tx = self.db.begin().await?;
            let reservation = self.reserve_in(&mut tx, user_id, action, interview_tier).await?;
            if matches!(reservation, Reservation::Allowed { .. }) {
                tx.commit().await?;
            }
            Ok(reservation)
        })
        .await?;

        if let Reservation::Denied(denial) = &reservation {
            self.emit_denied(user_id, denial);
        }

        Ok(reservation)
    }

    /// Check-and-increment inside the caller's transaction.
    ///
    /// A concurrent counter write surfaces as `Error::Conflict`; the caller
    /// retries its whole transaction. Nothing is written on denial.
    pub async fn reserve_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
        action: EntitlementAction,
        interview_tier: Option<SubscriptionTier>,
    ) -> Result<Reservation> {
        let mut user = users::load_user(&mut *conn, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;

        let grant = match decide(&user, action, interview_tier, Utc::now()) {
            Ok(grant) => grant,
            Err(reason) => {
                debug!(
                    user_id = %user_id,
                    action = action.as_str(),
                    reason = reason.as_str(),
                    "Reservation denied"
                );
                return Ok(Reservation::Denied(Denial {
                    action,
                    reason,
                    upgrade_hint: upgrade_hint(user.tier, &self.pricing),
                }));
            }
        };

        if let Some(counter) = grant.consumes {
            match counter {
                Counter::FreeAnswers => user.free_answers_used += 1,
                Counter::FreeInterviews => user.free_interviews_used += 1,
                Counter::StarterInterviews => user.starter_interviews_used += 1,
            }
            users::update_user(conn, &user).await?;
        }

        debug!(
            user_id = %user_id,
            action = action.as_str(),
            covered_by = %grant.covered_by,
            "Reservation allowed"
        );

        Ok(Reservation::Allowed {
            covered_by: grant.covered_by,
        })
    }

    /// Apply a billing change through the same version check as `reserve`
    pub async fn set_tier(&self, change: &TierChange) -> Result<User> {
        let (old_tier, user) = retry_on_conflict("entitlement_set_tier", self.max_lock_wait_ms, || async move {
            let mut tx = self.db.begin().await?;
            let mut user = users::load_user(&mut *tx, change.user_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("User {}", change.user_id)))?;
            let old_tier = user.tier;

            user.tier = change.tier;
            user.starter_interview_credits = user
                .starter_interview_credits
                .saturating_add(change.credited_interviews);

            if let Some(expires_at) = change.starter_expires_at {
                user.starter_expires_at = Some(expires_at);
            } else if change.tier == SubscriptionTier::Starter && change.credited_interviews > 0 {
                let expires_at = Utc::now() + Duration::days(self.starter_access_days);
                user.starter_expires_at = Some(match user.starter_expires_at {
                    Some(existing) if existing > expires_at => existing,
                    _ => expires_at,
                });
            }

            users::update_user(&mut tx, &user).await?;
            tx.commit().await?;

            user.version += 1;
            Ok((old_tier, user))
        })
        .await?;

        info!(
            user_id = %user.id,
            old_tier = %old_tier,
            new_tier = %user.tier,
            credited_interviews = change.credited_interviews,
            "Subscription tier changed"
        );

        self.event_bus.emit_lossy(PipelineEvent::TierChanged {
            user_id: user.id,
            old_tier,
            new_tier: user.tier,
            credited_interviews: change.credited_interviews,
            timestamp: Utc::now(),
        });

        Ok(user)
    }

    /// Current entitlement of a user
    pub async fn entitlement(&self, user_id: Uuid) -> Result<EntitlementView> {
        let user = users::load_user(&self.db, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;

        Ok(self.view(&user, Utc::now()))
    }

    fn view(&self, user: &User, now: DateTime<Utc>) -> EntitlementView {
        let starter_expired = user.starter_expired(now);
        let (answers_remaining, interviews_remaining) = match user.tier {
            SubscriptionTier::Free => (
                Some(FREE_ANSWER_LIMIT.saturating_sub(user.free_answers_used)),
                Some(FREE_INTERVIEW_LIMIT.saturating_sub(user.free_interviews_used)),
            ),
            SubscriptionTier::Starter if starter_expired => (Some(0), Some(0)),
            SubscriptionTier::Starter => (
                None,
                Some(
                    user.starter_interview_credits
                        .saturating_sub(user.starter_interviews_used),
                ),
            ),
            SubscriptionTier::Premium => (None, None),
        };

        EntitlementView {
            user_id: user.id,
            tier: user.tier,
            free_answers_used: user.free_answers_used,
            free_interviews_used: user.free_interviews_used,
            starter_interviews_used: user.starter_interviews_used,
            starter_interview_credits: user.starter_interview_credits,
            starter_expires_at: user.starter_expires_at,
            starter_expired,
            answers_remaining,
            interviews_remaining,
            upgrade_hint: upgrade_hint(user.tier, &self.pricing),
        }
    }

    pub(crate) fn emit_denied(&self, user_id: Uuid, denial: &Denial) {
        info!(
            user_id = %user_id,
            action = denial.action.as_str(),
            reason = denial.reason.as_str(),
            "Entitlement denied"
        );
        self.event_bus.emit_lossy(PipelineEvent::EntitlementDenied {
            user_id,
            action: denial.action.as_str().to_string(),
            reason: denial.reason.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }
}
