//! Billing error types

use thiserror::Error;
use uuid::Uuid;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("No qualifying subscription for organization: {0}")]
    NoSubscription(Uuid),

    #[error("Payment past due for organization: {0}")]
    PaymentRequired(Uuid),

    #[error("Subscription expired for organization: {0}")]
    SubscriptionExpired(Uuid),

    #[error("Insufficient word allowance: requested {requested}, available {available}")]
    InsufficientAllowance { requested: i64, available: i64 },

    #[error("Words already deducted for analysis: {0}")]
    DuplicateDeduction(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

/// True if the error is a Postgres unique-constraint violation (23505)
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
