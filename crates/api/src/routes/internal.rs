//! Internal routes for scheduled jobs and operations tooling.
//!
//! Guarded by a shared secret in the X-Internal-Token header. When no token
//! is configured these routes refuse all requests.

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

fn require_internal_token(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.internal_job_token.as_deref() else {
        tracing::warn!("Internal route called but INTERNAL_JOB_TOKEN is not configured");
        return Err(ApiError::Unauthorized);
    };

    let provided = headers
        .get("x-internal-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided != expected {
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}

#[derive(Debug, Deserialize, Default)]
pub struct ResetRequest {
    /// Reset a single organization; when omitted, sweep all orgs due a reset
    pub org_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct OrgResetResponse {
    pub org_id: Uuid,
    pub unused_words_rolled_over: i64,
    pub expired_entries_removed: u64,
    pub new_month_allowance: i64,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub orgs_reset: usize,
    pub orgs_failed: usize,
    pub outcomes: Vec<OrgResetResponse>,
}

/// Run the monthly allowance reset.
///
/// Safe to call repeatedly; an org that already has a usage record for the
/// current month is skipped by the due query, and a direct re-run for an
/// org grants no additional rollover.
pub async fn reset_monthly_allowance(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ResetRequest>>,
) -> ApiResult<Json<ResetResponse>> {
    require_internal_token(&state, &headers)?;

    let req = body.map(|Json(r)| r).unwrap_or_default();

    let org_ids = match req.org_id {
        Some(org_id) => vec![org_id],
        None => state.reset.orgs_due_for_reset().await?,
    };

    let mut outcomes = Vec::new();
    let mut orgs_failed = 0usize;

    for org_id in org_ids {
        match state.reset.reset_monthly_allowance(org_id).await {
            Ok(outcome) => outcomes.push(OrgResetResponse {
                org_id,
                unused_words_rolled_over: outcome.unused_words_rolled_over,
                expired_entries_removed: outcome.expired_entries_removed,
                new_month_allowance: outcome.new_month_allowance,
            }),
            Err(err) => {
                orgs_failed += 1;
                tracing::error!(org_id = %org_id, error = %err, "Monthly reset failed for org");
            }
        }
    }

    Ok(Json(ResetResponse {
        orgs_reset: outcomes.len(),
        orgs_failed,
        outcomes,
    }))
}

/// Run the billing invariant checks and report violations.
pub async fn run_invariants(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_internal_token(&state, &headers)?;

    let summary = state.invariants.run_all_checks().await?;

    Ok(Json(json!({
        "checks_run": summary.checks_run,
        "violations_found": summary.violations.len(),
        "violations": summary.violations,
    })))
}
