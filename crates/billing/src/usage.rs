//! Monthly usage records
//!
//! One row per (org, subscription, month). `word_allowance` is copied from
//! the subscription when the row is created and never updated afterwards, so
//! a mid-month plan change cannot retroactively alter a month already being
//! consumed. `words_used` tracks base-allowance consumption only; rollover
//! consumption lives in the rollover ledger.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::error::BillingResult;

/// A per-month usage row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub subscription_id: Uuid,
    pub month_start: Date,
    pub word_allowance: i64,
    pub words_used: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UsageRecord {
    /// Words still available from the base monthly allowance
    pub fn base_remaining(&self) -> i64 {
        (self.word_allowance - self.words_used).max(0)
    }
}

/// Usage record data access
#[derive(Clone)]
pub struct UsageLedger {
    pool: PgPool,
}

impl UsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the usage record for a given month, if one exists
    pub async fn record_for_month(
        &self,
        org_id: Uuid,
        subscription_id: Uuid,
        month_start: Date,
    ) -> BillingResult<Option<UsageRecord>> {
        let record: Option<UsageRecord> = sqlx::query_as(
            r#"
            SELECT id, org_id, subscription_id, month_start, word_allowance,
                   words_used, created_at, updated_at
            FROM subscription_usage
            WHERE org_id = $1 AND subscription_id = $2 AND month_start = $3
            "#,
        )
        .bind(org_id)
        .bind(subscription_id)
        .bind(month_start)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
