//! Allowance checking
//!
//! Read-only: answers "can this many words be consumed?" without mutating
//! anything, so callers may invoke it repeatedly (pricing display, submit
//! gate) with no side effects. A missing usage record for the current month
//! reads as zero words used; record creation is left to the deductor and the
//! monthly reset.
//!
//! No guarantee is made against check/deduct races. The deductor re-validates
//! under row locks before committing; a stale positive answer here degrades
//! to an insufficient-allowance failure there.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use memoledger_shared::{PlanKey, SubscriptionStatus};

use crate::error::{BillingError, BillingResult};
use crate::period;
use crate::rollover::RolloverLedger;
use crate::subscription::{AllowanceGate, SubscriptionStore};
use crate::usage::UsageLedger;

/// Call to action attached to a denied allowance check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    StartTrial,
    UpdatePayment,
    Resubscribe,
    UpgradePlan,
}

/// Result of an allowance check
#[derive(Debug, Clone, Serialize)]
pub struct AllowanceDecision {
    pub allowed: bool,
    /// Human-readable explanation when denied
    pub reason: Option<String>,
    /// Base-allowance remainder plus live rollover at evaluation time
    pub words_available: i64,
    /// Balance left if the requested amount were consumed; only set when allowed
    pub words_remaining_after: Option<i64>,
    pub upgrade_needed: bool,
    pub suggested_action: Option<SuggestedAction>,
}

impl AllowanceDecision {
    fn denied(reason: String, words_available: i64, action: SuggestedAction) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            words_available,
            words_remaining_after: None,
            upgrade_needed: action == SuggestedAction::UpgradePlan,
            suggested_action: Some(action),
        }
    }
}

/// Per-entry rollover balance for dashboard display
#[derive(Debug, Clone, Serialize)]
pub struct RolloverBalance {
    pub id: i64,
    pub grant_month: Date,
    pub amount_remaining: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Read-only usage snapshot for dashboards.
///
/// Computed from the same rows the allowance check reads, so the numbers a
/// user sees always match the numbers the submit gate will apply.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub org_id: Uuid,
    pub month_start: Date,
    pub plan_key: Option<PlanKey>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub word_allowance: i64,
    pub words_used: i64,
    pub base_remaining: i64,
    pub rollover_available: i64,
    pub words_available: i64,
    pub rollover_entries: Vec<RolloverBalance>,
}

/// Allowance checking service
#[derive(Clone)]
pub struct AllowanceChecker {
    subscriptions: SubscriptionStore,
    usage: UsageLedger,
    rollover: RolloverLedger,
}

impl AllowanceChecker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            subscriptions: SubscriptionStore::new(pool.clone()),
            usage: UsageLedger::new(pool.clone()),
            rollover: RolloverLedger::new(pool),
        }
    }

    /// Check whether `words_needed` words can be consumed by this org.
    pub async fn check_word_allowance(
        &self,
        org_id: Uuid,
        words_needed: i64,
    ) -> BillingResult<AllowanceDecision> {
        if words_needed < 0 {
            return Err(BillingError::InvalidInput(format!(
                "words_needed must be non-negative, got {}",
                words_needed
            )));
        }

        let now = OffsetDateTime::now_utc();
        let subscription = self.subscriptions.current_for_org(org_id).await?;

        match AllowanceGate::evaluate(subscription.as_ref(), now) {
            AllowanceGate::NoSubscription => {
                return Ok(AllowanceDecision::denied(
                    "No subscription found for this organization".to_string(),
                    0,
                    SuggestedAction::StartTrial,
                ));
            }
            AllowanceGate::Expired => {
                return Ok(AllowanceDecision::denied(
                    "Subscription has expired".to_string(),
                    0,
                    SuggestedAction::Resubscribe,
                ));
            }
            AllowanceGate::PaymentRequired => {
                return Ok(AllowanceDecision::denied(
                    "Payment is past due; usage is blocked until payment is updated".to_string(),
                    0,
                    SuggestedAction::UpdatePayment,
                ));
            }
            AllowanceGate::Open => {}
        }

        // Gate is open, so a subscription exists
        let Some(sub) = subscription else {
            return Err(BillingError::Internal("Open gate without subscription".to_string()));
        };

        let month_start = period::current_month_start(now);
        let base_remaining = match self
            .usage
            .record_for_month(org_id, sub.id, month_start)
            .await?
        {
            Some(record) => record.base_remaining(),
            // Month not initialized yet: the full allowance is untouched
            None => sub.word_allowance,
        };
        let rollover_available = self.rollover.live_total(org_id, now).await?;

        let decision = decide(words_needed, base_remaining + rollover_available);

        tracing::debug!(
            org_id = %org_id,
            words_needed = words_needed,
            words_available = decision.words_available,
            allowed = decision.allowed,
            "Allowance check"
        );

        Ok(decision)
    }

    /// Read-only snapshot of the org's current balances for display.
    pub async fn current_usage(&self, org_id: Uuid) -> BillingResult<UsageSnapshot> {
        let now = OffsetDateTime::now_utc();
        let month_start = period::current_month_start(now);
        let subscription = self.subscriptions.current_for_org(org_id).await?;

        let Some(sub) = subscription else {
            return Ok(UsageSnapshot {
                org_id,
                month_start,
                plan_key: None,
                subscription_status: None,
                word_allowance: 0,
                words_used: 0,
                base_remaining: 0,
                rollover_available: 0,
                words_available: 0,
                rollover_entries: Vec::new(),
            });
        };

        let (word_allowance, words_used) = match self
            .usage
            .record_for_month(org_id, sub.id, month_start)
            .await?
        {
            Some(record) => (record.word_allowance, record.words_used),
            None => (sub.word_allowance, 0),
        };
        let base_remaining = (word_allowance - words_used).max(0);

        let entries = self.rollover.live_entries(org_id, now).await?;
        let rollover_available: i64 = entries.iter().map(|e| e.amount_remaining).sum();

        Ok(UsageSnapshot {
            org_id,
            month_start,
            plan_key: Some(sub.plan_key),
            subscription_status: Some(sub.status),
            word_allowance,
            words_used,
            base_remaining,
            rollover_available,
            words_available: base_remaining + rollover_available,
            rollover_entries: entries
                .into_iter()
                .map(|e| RolloverBalance {
                    id: e.id,
                    grant_month: e.grant_month,
                    amount_remaining: e.amount_remaining,
                    expires_at: e.expires_at,
                })
                .collect(),
        })
    }
}

/// Pure arithmetic for an open-gate check
fn decide(words_needed: i64, words_available: i64) -> AllowanceDecision {
    if words_needed > words_available {
        return AllowanceDecision::denied(
            format!(
                "Insufficient word allowance: {} words needed, {} available",
                words_needed, words_available
            ),
            words_available,
            SuggestedAction::UpgradePlan,
        );
    }

    AllowanceDecision {
        allowed: true,
        reason: None,
        words_available,
        words_remaining_after: Some(words_available - words_needed),
        upgrade_needed: false,
        suggested_action: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_allowed_reports_remaining_after() {
        // allowance 1000, used 200, rollover 50
        let decision = decide(800, 850);
        assert!(decision.allowed);
        assert_eq!(decision.words_available, 850);
        assert_eq!(decision.words_remaining_after, Some(50));
        assert!(!decision.upgrade_needed);
        assert!(decision.suggested_action.is_none());
    }

    #[test]
    fn test_decide_zero_words_is_trivially_allowed() {
        let decision = decide(0, 0);
        assert!(decision.allowed);
        assert_eq!(decision.words_remaining_after, Some(0));
    }

    #[test]
    fn test_decide_shortfall_suggests_upgrade() {
        let decision = decide(900, 850);
        assert!(!decision.allowed);
        assert!(decision.upgrade_needed);
        assert_eq!(decision.suggested_action, Some(SuggestedAction::UpgradePlan));
        let reason = decision.reason.unwrap_or_default();
        assert!(reason.contains("900"));
        assert!(reason.contains("850"));
    }
}
