//! Usage snapshot route

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use memoledger_billing::UsageSnapshot;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub org_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct RolloverEntryResponse {
    pub grant_month: String,
    pub amount_remaining: i64,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub org_id: Uuid,
    pub month_start: String,
    pub plan_key: Option<String>,
    pub subscription_status: Option<String>,
    pub word_allowance: i64,
    pub words_used: i64,
    pub base_remaining: i64,
    pub rollover_available: i64,
    pub words_available: i64,
    pub rollover_entries: Vec<RolloverEntryResponse>,
}

impl From<UsageSnapshot> for UsageResponse {
    fn from(s: UsageSnapshot) -> Self {
        Self {
            org_id: s.org_id,
            month_start: s.month_start.to_string(),
            plan_key: s.plan_key.map(|p| p.to_string()),
            subscription_status: s.subscription_status.map(|st| st.to_string()),
            word_allowance: s.word_allowance,
            words_used: s.words_used,
            base_remaining: s.base_remaining,
            rollover_available: s.rollover_available,
            words_available: s.words_available,
            rollover_entries: s
                .rollover_entries
                .into_iter()
                .map(|e| RolloverEntryResponse {
                    grant_month: e.grant_month.to_string(),
                    amount_remaining: e.amount_remaining,
                    expires_at: format_datetime(e.expires_at),
                })
                .collect(),
        }
    }
}

fn format_datetime(dt: time::OffsetDateTime) -> String {
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| dt.to_string())
}

/// Current-month usage and rollover balances for an organization.
///
/// Reads the same rows the allowance check reads, so dashboard numbers
/// always agree with the submit gate.
pub async fn get_current_usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<UsageResponse>> {
    let snapshot = state.checker.current_usage(query.org_id).await?;
    Ok(Json(snapshot.into()))
}
