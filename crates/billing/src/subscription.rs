//! Subscription lookup and the status gate
//!
//! The gate decision is a pure function over the subscription row so the
//! trial/active/past_due/cancelled branches can be tested without a database.

use memoledger_shared::{PlanKey, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// A subscription row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub org_id: Uuid,
    pub plan_key: PlanKey,
    /// Monthly word quota, copied into each month's usage record at creation
    pub word_allowance: i64,
    pub status: SubscriptionStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_end_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Outcome of the subscription status gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowanceGate {
    /// Usage may proceed (trial, active, or cancelled within the paid-through period)
    Open,
    /// Organization has no subscription at all
    NoSubscription,
    /// Payment failed; all usage blocked until payment is fixed
    PaymentRequired,
    /// Cancelled and the paid-through period has passed
    Expired,
}

impl AllowanceGate {
    /// Evaluate the gate for an organization's current subscription.
    ///
    /// A cancelled subscription stays open until `current_period_end`; a
    /// cancelled row with no period end is treated as already expired.
    pub fn evaluate(subscription: Option<&Subscription>, now: OffsetDateTime) -> Self {
        let Some(sub) = subscription else {
            return AllowanceGate::NoSubscription;
        };

        match sub.status {
            SubscriptionStatus::Cancelled => {
                let paid_through = sub.current_period_end.map(|end| end > now).unwrap_or(false);
                if paid_through {
                    AllowanceGate::Open
                } else {
                    AllowanceGate::Expired
                }
            }
            SubscriptionStatus::PastDue => AllowanceGate::PaymentRequired,
            SubscriptionStatus::Trial | SubscriptionStatus::Active => AllowanceGate::Open,
        }
    }
}

/// Subscription lookup service
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: PgPool,
}

impl SubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the organization's current subscription.
    ///
    /// Prefers the single non-terminal subscription; falls back to the most
    /// recent cancelled one so the grace period can be evaluated.
    pub async fn current_for_org(&self, org_id: Uuid) -> BillingResult<Option<Subscription>> {
        let sub: Option<Subscription> = sqlx::query_as(
            r#"
            SELECT id, org_id, plan_key, word_allowance, status, trial_end_date,
                   current_period_end, cancel_at_period_end, created_at, updated_at
            FROM subscriptions
            WHERE org_id = $1
            ORDER BY (status IN ('trial', 'active', 'past_due')) DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sub)
    }
}
