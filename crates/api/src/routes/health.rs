//! Health check route

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{error::ApiResult, state::AppState};

/// Liveness + database reachability check
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    sqlx::query("SELECT 1").execute(&state.pool).await?;

    Ok(Json(json!({
        "status": "ok",
    })))
}
