//! Rollover ledger
//!
//! Append-only grants of unused words from prior months. Entries are created
//! only by the monthly reset, drawn down only by the deductor, and expire 12
//! months after their grant month. An entry is "live" while
//! `expires_at > now` and `amount_remaining > 0`.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;

/// A rollover ledger row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RolloverEntry {
    pub id: i64,
    pub org_id: Uuid,
    pub subscription_id: Uuid,
    pub grant_month: Date,
    pub amount_granted: i64,
    pub amount_remaining: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Rollover ledger data access
#[derive(Clone)]
pub struct RolloverLedger {
    pool: PgPool,
}

impl RolloverLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Live entries for an org, soonest-expiring first (id breaks ties)
    pub async fn live_entries(
        &self,
        org_id: Uuid,
        now: OffsetDateTime,
    ) -> BillingResult<Vec<RolloverEntry>> {
        let entries: Vec<RolloverEntry> = sqlx::query_as(
            r#"
            SELECT id, org_id, subscription_id, grant_month, amount_granted,
                   amount_remaining, expires_at, created_at
            FROM rollover_ledger
            WHERE org_id = $1 AND amount_remaining > 0 AND expires_at > $2
            ORDER BY expires_at ASC, id ASC
            "#,
        )
        .bind(org_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Total live rollover words for an org
    pub async fn live_total(&self, org_id: Uuid, now: OffsetDateTime) -> BillingResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount_remaining)::BIGINT
            FROM rollover_ledger
            WHERE org_id = $1 AND amount_remaining > 0 AND expires_at > $2
            "#,
        )
        .bind(org_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }
}
