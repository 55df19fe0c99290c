//! Monthly allowance reset
//!
//! Runs once per organization per calendar-month boundary (the worker owns
//! scheduling): banks last month's unused words as a rollover grant, purges
//! expired rollover rows, and opens the new month's usage record with the
//! allowance copied fresh from the current subscription.
//!
//! Idempotent by construction: both inserts ride unique constraints with
//! `ON CONFLICT DO NOTHING`, so a duplicate run in the same month is a no-op
//! success, never an error.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::period;
use crate::subscription::{AllowanceGate, Subscription};

/// What a reset run did
#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    /// Unused words banked into the rollover ledger by this run (0 when the
    /// grant already existed or nothing was left over)
    pub unused_words_rolled_over: i64,
    /// Expired rollover rows deleted
    pub expired_entries_removed: u64,
    /// Allowance of the freshly opened month (0 when the org has no usable
    /// subscription this month)
    pub new_month_allowance: i64,
}

/// Unused words left in a month: never negative even if data is off
fn unused_words(word_allowance: i64, words_used: i64) -> i64 {
    (word_allowance - words_used).max(0)
}

/// Monthly reset service
#[derive(Clone)]
pub struct MonthlyReset {
    pool: PgPool,
}

impl MonthlyReset {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Roll the organization over into the current month.
    pub async fn reset_monthly_allowance(&self, org_id: Uuid) -> BillingResult<ResetOutcome> {
        let now = OffsetDateTime::now_utc();
        let this_month = period::current_month_start(now);
        let last_month = period::previous_month(this_month);

        let mut tx = self.pool.begin().await?;

        // Bank last month's unused words, if that month was ever opened.
        // Any subscription's record counts: a plan change mid-quarter leaves
        // the old subscription's final month behind.
        let last_record: Option<(Uuid, i64, i64)> = sqlx::query_as(
            r#"
            SELECT subscription_id, word_allowance, words_used
            FROM subscription_usage
            WHERE org_id = $1 AND month_start = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .bind(last_month)
        .fetch_optional(&mut *tx)
        .await?;

        let mut rolled_over = 0i64;
        if let Some((subscription_id, word_allowance, words_used)) = last_record {
            let unused = unused_words(word_allowance, words_used);
            if unused > 0 {
                let result = sqlx::query(
                    r#"
                    INSERT INTO rollover_ledger
                        (org_id, subscription_id, grant_month, amount_granted, amount_remaining, expires_at)
                    VALUES ($1, $2, $3, $4, $4, $5)
                    ON CONFLICT (org_id, grant_month) DO NOTHING
                    "#,
                )
                .bind(org_id)
                .bind(subscription_id)
                .bind(last_month)
                .bind(unused)
                .bind(period::rollover_expiry(last_month))
                .execute(&mut *tx)
                .await?;

                // rows_affected == 0 means a previous run already granted it
                if result.rows_affected() > 0 {
                    rolled_over = unused;
                }
            }
        }

        let purged = sqlx::query("DELETE FROM rollover_ledger WHERE org_id = $1 AND expires_at <= $2")
            .bind(org_id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // Open the new month against the current subscription so a plan
        // change that took effect picks up the new allowance
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

        let mut new_month_allowance = 0i64;
        if let Some(ref sub) = sub {
            if AllowanceGate::evaluate(Some(sub), now) == AllowanceGate::Open {
                sqlx::query(
                    r#"
                    INSERT INTO subscription_usage (org_id, subscription_id, month_start, word_allowance, words_used)
                    VALUES ($1, $2, $3, $4, 0)
                    ON CONFLICT (org_id, subscription_id, month_start) DO NOTHING
                    "#,
                )
                .bind(org_id)
                .bind(sub.id)
                .bind(this_month)
                .bind(sub.word_allowance)
                .execute(&mut *tx)
                .await?;
                new_month_allowance = sub.word_allowance;
            }
        }

        tx.commit().await?;

        tracing::info!(
            org_id = %org_id,
            month = %this_month,
            rolled_over = rolled_over,
            expired_removed = purged,
            new_month_allowance = new_month_allowance,
            "Monthly allowance reset"
        );

        Ok(ResetOutcome {
            unused_words_rolled_over: rolled_over,
            expired_entries_removed: purged,
            new_month_allowance,
        })
    }

    /// Organizations with a usable subscription but no usage record for the
    /// current month. Feeds the worker's boundary run and catch-up sweep.
    pub async fn orgs_due_for_reset(&self) -> BillingResult<Vec<Uuid>> {
        let now = OffsetDateTime::now_utc();
        let this_month = period::current_month_start(now);

        let org_ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT s.org_id
            FROM subscriptions s
            WHERE (
                s.status IN ('trial', 'active', 'past_due')
                OR (s.status = 'cancelled' AND s.current_period_end > $2)
            )
            AND NOT EXISTS (
                SELECT 1 FROM subscription_usage u
                WHERE u.org_id = s.org_id AND u.month_start = $1
            )
            "#,
        )
        .bind(this_month)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(org_ids.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_words() {
        // 1000 allowance, 300 used -> 700 banked
        assert_eq!(unused_words(1_000, 300), 700);
        assert_eq!(unused_words(1_000, 1_000), 0);
        // Never negative, even if words_used somehow ran over
        assert_eq!(unused_words(1_000, 1_200), 0);
    }
}
