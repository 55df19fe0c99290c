//! Allowance check and deduction routes
//!
//! Callers are trusted internal services (the analysis submission flow and
//! the completion handler); org_id is always explicit in the request.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use memoledger_billing::AllowanceDecision;

use crate::{error::ApiResult, state::AppState};

/// Request body for an allowance check
#[derive(Debug, Deserialize)]
pub struct CheckAllowanceRequest {
    pub org_id: Uuid,
    pub words_needed: i64,
}

/// Check whether an analysis of this size may be submitted.
///
/// Side-effect free; safe to call once for pricing display and again at
/// submission time.
pub async fn check_word_allowance(
    State(state): State<AppState>,
    Json(req): Json<CheckAllowanceRequest>,
) -> ApiResult<Json<AllowanceDecision>> {
    let decision = state
        .checker
        .check_word_allowance(req.org_id, req.words_needed)
        .await?;

    Ok(Json(decision))
}

/// Request body for a word deduction
#[derive(Debug, Deserialize)]
pub struct DeductWordsRequest {
    pub org_id: Uuid,
    pub words_used: i64,
    pub analysis_id: Uuid,
}

/// Deduction response with the allowance/rollover split for audit display
#[derive(Debug, Serialize)]
pub struct DeductWordsResponse {
    pub words_deducted: i64,
    pub from_allowance: i64,
    pub from_rollover: i64,
}

/// Deduct words after a verified-successful analysis.
///
/// Must be called exactly once per analysis; a repeat call returns 409 and
/// charges nothing. A 402 here means a concurrent submission consumed the
/// balance between check and deduct; the caller should surface "please
/// retry" and must not charge partial words.
pub async fn deduct_words(
    State(state): State<AppState>,
    Json(req): Json<DeductWordsRequest>,
) -> ApiResult<Json<DeductWordsResponse>> {
    tracing::info!(
        org_id = %req.org_id,
        analysis_id = %req.analysis_id,
        words_used = req.words_used,
        "deduct_words called"
    );

    let breakdown = state
        .deductor
        .deduct_words(req.org_id, req.words_used, req.analysis_id)
        .await?;

    Ok(Json(DeductWordsResponse {
        words_deducted: breakdown.words_deducted,
        from_allowance: breakdown.from_allowance,
        from_rollover: breakdown.from_rollover,
    }))
}
