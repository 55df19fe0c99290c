//! Shared application state

use sqlx::PgPool;

use memoledger_billing::{AllowanceChecker, InvariantChecker, MonthlyReset, WordDeductor};

/// Application state shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub checker: AllowanceChecker,
    pub deductor: WordDeductor,
    pub reset: MonthlyReset,
    pub invariants: InvariantChecker,
    /// Shared secret required on /api/v1/internal routes (None disables them)
    pub internal_job_token: Option<String>,
}

impl AppState {
    pub fn new(pool: PgPool, internal_job_token: Option<String>) -> Self {
        Self {
            checker: AllowanceChecker::new(pool.clone()),
            deductor: WordDeductor::new(pool.clone()),
            reset: MonthlyReset::new(pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            pool,
            internal_job_token,
        }
    }
}
