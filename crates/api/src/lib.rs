//! Memoledger API Library
//!
//! HTTP surface over the allowance core: allowance checks, word deduction,
//! usage snapshots, and internal scheduler/ops endpoints.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
