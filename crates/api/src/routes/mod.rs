//! API route definitions

pub mod allowance;
pub mod health;
pub mod internal;
pub mod usage;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Build the application router
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/allowance/check", post(allowance::check_word_allowance))
        .route("/api/v1/allowance/deduct", post(allowance::deduct_words))
        .route("/api/v1/usage/current", get(usage::get_current_usage))
        .route("/api/v1/internal/reset", post(internal::reset_monthly_allowance))
        .route("/api/v1/internal/invariants", get(internal::run_invariants))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
