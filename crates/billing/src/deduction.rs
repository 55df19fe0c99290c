//! Word deduction
//!
//! The single mutator of usage and rollover balances. Every deduction runs in
//! one transaction holding `FOR UPDATE` row locks on the month's usage record
//! and every rollover row it may draw from, so two analyses racing for the
//! same finite pool serialize and cannot both spend it. Lock waits are
//! bounded by a statement timeout and fail closed with no partial deduction.
//!
//! Consumption order: current-month base allowance first, then rollover
//! entries soonest-expiring first (entry id breaks expiry ties).

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{is_unique_violation, BillingError, BillingResult};
use crate::period;
use crate::subscription::{AllowanceGate, Subscription};

/// How a deduction was covered, stored alongside the analysis for disputes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductionBreakdown {
    pub words_deducted: i64,
    pub from_allowance: i64,
    pub from_rollover: i64,
}

/// A single draw against one rollover entry
#[derive(Debug, Clone, PartialEq, Eq)]
struct RolloverDraw {
    entry_id: i64,
    amount: i64,
}

/// Planned split of a deduction across base allowance and rollover entries
#[derive(Debug, Clone)]
struct DeductionPlan {
    from_allowance: i64,
    draws: Vec<RolloverDraw>,
}

impl DeductionPlan {
    fn from_rollover(&self) -> i64 {
        self.draws.iter().map(|d| d.amount).sum()
    }
}

/// Split `requested` words across the base allowance and rollover entries.
///
/// `entries` must already be ordered by consumption priority (soonest expiry
/// first). Returns the total available on shortfall so the error can report
/// the exact gap; no partial plan is produced.
fn plan_deduction(
    requested: i64,
    base_available: i64,
    entries: &[(i64, i64)],
) -> Result<DeductionPlan, i64> {
    let base_available = base_available.max(0);
    let from_allowance = requested.min(base_available);
    let mut remainder = requested - from_allowance;

    let mut draws = Vec::new();
    for &(entry_id, amount_remaining) in entries {
        if remainder == 0 {
            break;
        }
        let amount = remainder.min(amount_remaining.max(0));
        if amount > 0 {
            draws.push(RolloverDraw { entry_id, amount });
            remainder -= amount;
        }
    }

    if remainder > 0 {
        let available: i64 =
            base_available + entries.iter().map(|&(_, r)| r.max(0)).sum::<i64>();
        return Err(available);
    }

    Ok(DeductionPlan {
        from_allowance,
        draws,
    })
}

fn lock_timeout_ms() -> i32 {
    std::env::var("DEDUCTION_LOCK_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10_000)
}

/// Word deduction service
#[derive(Clone)]
pub struct WordDeductor {
    pool: PgPool,
}

impl WordDeductor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Permanently consume `words_used` words for a completed analysis.
    ///
    /// Precondition (caller-enforced): the analysis actually succeeded, and
    /// this is called exactly once per analysis. The unique audit row on
    /// `analysis_id` turns a second call into `DuplicateDeduction` rather
    /// than a silent double charge.
    pub async fn deduct_words(
        &self,
        org_id: Uuid,
        words_used: i64,
        analysis_id: Uuid,
    ) -> BillingResult<DeductionBreakdown> {
        if words_used < 0 {
            return Err(BillingError::InvalidInput(format!(
                "words_used must be non-negative, got {}",
                words_used
            )));
        }

        let now = OffsetDateTime::now_utc();
        let month_start = period::current_month_start(now);

        let mut tx = self.pool.begin().await?;

        // Bound lock waits; blocking past this fails the transaction rather
        // than deducting without the locks
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", lock_timeout_ms()))
            .execute(&mut *tx)
            .await?;

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
        .fetch_optional(&mut *tx)
        .await?;

        let sub = sub.ok_or(BillingError::NoSubscription(org_id))?;

        // Re-check the status gate under the transaction. The checker runs
        // first in the normal flow, but a subscription that lapsed between
        // check and deduct must not be charged.
        match AllowanceGate::evaluate(Some(&sub), now) {
            AllowanceGate::Open => {}
            AllowanceGate::NoSubscription => {
                tx.rollback().await?;
                return Err(BillingError::NoSubscription(org_id));
            }
            AllowanceGate::PaymentRequired => {
                tx.rollback().await?;
                return Err(BillingError::PaymentRequired(org_id));
            }
            AllowanceGate::Expired => {
                tx.rollback().await?;
                return Err(BillingError::SubscriptionExpired(org_id));
            }
        }

        // Lock (and defensively create) the current month's usage record.
        // The checker normally runs first but does not create rows; a missing
        // record here just means the month is untouched.
        let usage_row: Option<(Uuid, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, word_allowance, words_used
            FROM subscription_usage
            WHERE org_id = $1 AND subscription_id = $2 AND month_start = $3
            FOR UPDATE
            "#,
        )
        .bind(org_id)
        .bind(sub.id)
        .bind(month_start)
        .fetch_optional(&mut *tx)
        .await?;

        let (usage_id, word_allowance, month_words_used) = match usage_row {
            Some(row) => row,
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO subscription_usage (org_id, subscription_id, month_start, word_allowance, words_used)
                    VALUES ($1, $2, $3, $4, 0)
                    ON CONFLICT (org_id, subscription_id, month_start) DO NOTHING
                    "#,
                )
                .bind(org_id)
                .bind(sub.id)
                .bind(month_start)
                .bind(sub.word_allowance)
                .execute(&mut *tx)
                .await?;

                sqlx::query_as(
                    r#"
                    SELECT id, word_allowance, words_used
                    FROM subscription_usage
                    WHERE org_id = $1 AND subscription_id = $2 AND month_start = $3
                    FOR UPDATE
                    "#,
                )
                .bind(org_id)
                .bind(sub.id)
                .bind(month_start)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        // Lock every live rollover row up front, in consumption order, so
        // concurrent deductions for this org serialize here
        let rollover_rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, amount_remaining
            FROM rollover_ledger
            WHERE org_id = $1 AND amount_remaining > 0 AND expires_at > $2
            ORDER BY expires_at ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(org_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let base_available = word_allowance - month_words_used;
        let plan = match plan_deduction(words_used, base_available, &rollover_rows) {
            Ok(plan) => plan,
            Err(available) => {
                // Check/deduct race: a concurrent deduction consumed the
                // balance after the caller's check. Nothing was charged.
                tx.rollback().await?;
                tracing::warn!(
                    org_id = %org_id,
                    analysis_id = %analysis_id,
                    requested = words_used,
                    available = available,
                    "Deduction rejected: insufficient allowance"
                );
                return Err(BillingError::InsufficientAllowance {
                    requested: words_used,
                    available,
                });
            }
        };

        if plan.from_allowance > 0 {
            sqlx::query(
                "UPDATE subscription_usage SET words_used = words_used + $1, updated_at = NOW() WHERE id = $2",
            )
            .bind(plan.from_allowance)
            .bind(usage_id)
            .execute(&mut *tx)
            .await?;
        }

        for draw in &plan.draws {
            sqlx::query(
                "UPDATE rollover_ledger SET amount_remaining = amount_remaining - $1 WHERE id = $2",
            )
            .bind(draw.amount)
            .bind(draw.entry_id)
            .execute(&mut *tx)
            .await?;
        }

        let from_rollover = plan.from_rollover();
        let audit_result = sqlx::query(
            r#"
            INSERT INTO allowance_deductions
                (org_id, analysis_id, words_deducted, from_allowance, from_rollover)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(org_id)
        .bind(analysis_id)
        .bind(words_used)
        .bind(plan.from_allowance)
        .bind(from_rollover)
        .execute(&mut *tx)
        .await;

        if let Err(err) = audit_result {
            tx.rollback().await?;
            if is_unique_violation(&err) {
                return Err(BillingError::DuplicateDeduction(analysis_id));
            }
            return Err(err.into());
        }

        tx.commit().await?;

        tracing::info!(
            org_id = %org_id,
            analysis_id = %analysis_id,
            words_deducted = words_used,
            from_allowance = plan.from_allowance,
            from_rollover = from_rollover,
            "Deducted words"
        );

        Ok(DeductionBreakdown {
            words_deducted: words_used,
            from_allowance: plan.from_allowance,
            from_rollover,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_month_covers_request_without_touching_rollover() {
        // allowance 1000, used 200, one rollover entry of 50
        let plan = plan_deduction(800, 800, &[(1, 50)]).expect("plan");
        assert_eq!(plan.from_allowance, 800);
        assert!(plan.draws.is_empty());
        assert_eq!(plan.from_rollover(), 0);
    }

    #[test]
    fn test_shortfall_rejects_whole_deduction() {
        // allowance remainder 800 + rollover 50 = 850 < 900
        let err = plan_deduction(900, 800, &[(1, 50)]).expect_err("shortfall");
        assert_eq!(err, 850);
    }

    #[test]
    fn test_remainder_spills_into_rollover() {
        let plan = plan_deduction(900, 800, &[(1, 50), (2, 200)]).expect("plan");
        assert_eq!(plan.from_allowance, 800);
        assert_eq!(
            plan.draws,
            vec![
                RolloverDraw { entry_id: 1, amount: 50 },
                RolloverDraw { entry_id: 2, amount: 50 },
            ]
        );
        assert_eq!(plan.from_rollover(), 100);
    }

    #[test]
    fn test_soonest_expiring_entry_exhausted_first() {
        // Entries arrive pre-sorted by (expires_at, id); the first must be
        // fully drained before the second is touched
        let plan = plan_deduction(120, 0, &[(7, 100), (3, 500)]).expect("plan");
        assert_eq!(
            plan.draws,
            vec![
                RolloverDraw { entry_id: 7, amount: 100 },
                RolloverDraw { entry_id: 3, amount: 20 },
            ]
        );
    }

    #[test]
    fn test_breakdown_sums_to_request() {
        for (requested, base, entries) in [
            (0, 500, vec![]),
            (500, 500, vec![]),
            (750, 500, vec![(1, 300)]),
            (1_000, 0, vec![(1, 400), (2, 600)]),
        ] {
            let plan = plan_deduction(requested, base, &entries).expect("plan");
            assert_eq!(plan.from_allowance + plan.from_rollover(), requested);
            assert!(plan.from_allowance <= base.max(0));
        }
    }

    #[test]
    fn test_exhausted_base_allowance_draws_only_rollover() {
        let plan = plan_deduction(30, -5, &[(1, 100)]).expect("plan");
        assert_eq!(plan.from_allowance, 0);
        assert_eq!(plan.from_rollover(), 30);
    }

    #[test]
    fn test_zero_request_is_a_noop_plan() {
        let plan = plan_deduction(0, 0, &[]).expect("plan");
        assert_eq!(plan.from_allowance, 0);
        assert!(plan.draws.is_empty());
    }
}
