//! Billing invariants
//!
//! Runnable consistency checks over the allowance tables. Each invariant is
//! a real SQL query that only reads, and every violation carries enough
//! context to debug. Intended to run after migrations, after incident
//! replays, and periodically from ops tooling.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Organization(s) affected
    pub org_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - organizations may be charged incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleSubsRow {
    org_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct RolloverBoundsRow {
    id: i64,
    org_id: Uuid,
    amount_granted: i64,
    amount_remaining: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct UsageOverrunRow {
    org_id: Uuid,
    month_start: time::Date,
    word_allowance: i64,
    words_used: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct CancelledNoPeriodEndRow {
    sub_id: Uuid,
    org_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleExpiredRow {
    org_id: Uuid,
    stale_count: i64,
}

/// Service for running billing invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_non_terminal_subscription().await?);
        violations.extend(self.check_rollover_remaining_in_bounds().await?);
        violations.extend(self.check_base_usage_within_allowance().await?);
        violations.extend(self.check_cancelled_has_period_end().await?);
        violations.extend(self.check_expired_rollover_purged().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most 1 non-terminal subscription per org
    ///
    /// Two live subscriptions would double-grant allowance and make the
    /// current-subscription lookup ambiguous.
    async fn check_single_non_terminal_subscription(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleSubsRow> = sqlx::query_as(
            r#"
            SELECT org_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE status IN ('trial', 'active', 'past_due')
            GROUP BY org_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_non_terminal_subscription".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization has {} live subscriptions (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Rollover amount_remaining stays within [0, amount_granted]
    ///
    /// A remainder outside these bounds means a deduction escaped its row
    /// lock or a grant was mutated after creation.
    async fn check_rollover_remaining_in_bounds(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<RolloverBoundsRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, amount_granted, amount_remaining
            FROM rollover_ledger
            WHERE amount_remaining < 0 OR amount_remaining > amount_granted
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "rollover_remaining_in_bounds".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Rollover entry {} has remaining {} outside [0, {}]",
                    row.id, row.amount_remaining, row.amount_granted
                ),
                context: serde_json::json!({
                    "entry_id": row.id,
                    "amount_granted": row.amount_granted,
                    "amount_remaining": row.amount_remaining,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Base words_used never exceeds the month's allowance
    ///
    /// words_used tracks base-allowance consumption only; anything past the
    /// allowance should have gone through the rollover ledger instead.
    async fn check_base_usage_within_allowance(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UsageOverrunRow> = sqlx::query_as(
            r#"
            SELECT org_id, month_start, word_allowance, words_used
            FROM subscription_usage
            WHERE words_used < 0 OR words_used > word_allowance
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "base_usage_within_allowance".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Usage record for {} has words_used {} against allowance {}",
                    row.month_start, row.words_used, row.word_allowance
                ),
                context: serde_json::json!({
                    "month_start": row.month_start.to_string(),
                    "word_allowance": row.word_allowance,
                    "words_used": row.words_used,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: Cancelled subscriptions carry a period end
    ///
    /// Without one, the grace-period gate cannot tell when to revoke access.
    async fn check_cancelled_has_period_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CancelledNoPeriodEndRow> = sqlx::query_as(
            r#"
            SELECT s.id as sub_id, s.org_id
            FROM subscriptions s
            WHERE s.status = 'cancelled'
              AND s.current_period_end IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "cancelled_has_period_end".to_string(),
                org_ids: vec![row.org_id],
                description: "Cancelled subscription has no period end date".to_string(),
                context: serde_json::json!({
                    "subscription_id": row.sub_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Long-expired rollover entries get purged
    ///
    /// Expired rows are harmless to balances (live queries exclude them) but
    /// lingering for more than a month means the reset job is not running.
    async fn check_expired_rollover_purged(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleExpiredRow> = sqlx::query_as(
            r#"
            SELECT org_id, COUNT(*) as stale_count
            FROM rollover_ledger
            WHERE expires_at < NOW() - INTERVAL '45 days'
            GROUP BY org_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "expired_rollover_purged".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization has {} rollover entries expired for over 45 days",
                    row.stale_count
                ),
                context: serde_json::json!({
                    "stale_count": row.stale_count,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_non_terminal_subscription" => {
                self.check_single_non_terminal_subscription().await
            }
            "rollover_remaining_in_bounds" => self.check_rollover_remaining_in_bounds().await,
            "base_usage_within_allowance" => self.check_base_usage_within_allowance().await,
            "cancelled_has_period_end" => self.check_cancelled_has_period_end().await,
            "expired_rollover_purged" => self.check_expired_rollover_purged().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_non_terminal_subscription",
            "rollover_remaining_in_bounds",
            "base_usage_within_allowance",
            "cancelled_has_period_end",
            "expired_rollover_purged",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 5);
        assert!(checks.contains(&"single_non_terminal_subscription"));
        assert!(checks.contains(&"rollover_remaining_in_bounds"));
    }
}
