//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use memoledger_billing::BillingError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Authorization for internal endpoints
    #[error("Authentication required")]
    Unauthorized,

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists")]
    Conflict(String),

    // Billing errors
    #[error("Subscription required")]
    SubscriptionRequired,
    #[error("Payment required")]
    PaymentRequired,
    #[error("Subscription expired")]
    SubscriptionExpired,
    #[error("Insufficient word allowance: {0}")]
    InsufficientAllowance(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            ApiError::SubscriptionRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "SUBSCRIPTION_REQUIRED",
                "No subscription found. Start a trial to begin analyzing documents.".to_string(),
            ),
            ApiError::PaymentRequired => (
                StatusCode::PAYMENT_REQUIRED,
                "PAYMENT_REQUIRED",
                "Payment is past due. Update your payment method to continue.".to_string(),
            ),
            ApiError::SubscriptionExpired => (
                StatusCode::PAYMENT_REQUIRED,
                "SUBSCRIPTION_EXPIRED",
                "Subscription has expired. Resubscribe to continue.".to_string(),
            ),
            ApiError::InsufficientAllowance(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_ALLOWANCE", msg.clone())
            }

            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NoSubscription(_) => ApiError::SubscriptionRequired,
            BillingError::PaymentRequired(_) => ApiError::PaymentRequired,
            BillingError::SubscriptionExpired(_) => ApiError::SubscriptionExpired,
            BillingError::InsufficientAllowance { .. } => {
                ApiError::InsufficientAllowance(err.to_string())
            }
            BillingError::DuplicateDeduction(_) => ApiError::Conflict(err.to_string()),
            BillingError::InvalidInput(msg) => ApiError::BadRequest(msg),
            BillingError::Database(msg) => {
                tracing::error!("Billing database error: {}", msg);
                ApiError::Database(msg)
            }
            BillingError::Internal(msg) => {
                tracing::error!("Billing internal error: {}", msg);
                ApiError::Internal
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // PostgreSQL unique violation
                    if code == "23505" {
                        return ApiError::Conflict("Resource already exists".to_string());
                    }
                }
                ApiError::Database(db_err.to_string())
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
