// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Memoledger Billing Module
//!
//! Subscription word-allowance accounting with rollover. This is the
//! financially load-bearing part of the platform: every memo analysis spends
//! words from a monthly allowance, unused words roll over for 12 months, and
//! overspend under concurrency must be impossible.
//!
//! ## Components
//!
//! - **AllowanceChecker**: read-only "can this many words be consumed?"
//! - **WordDeductor**: the only mutator; transactional, row-locked FIFO spend
//! - **MonthlyReset**: month-boundary rollover grant / expiry purge / new month
//! - **InvariantChecker**: runnable SQL consistency checks for ops

pub mod checker;
pub mod deduction;
pub mod error;
pub mod invariants;
pub mod period;
pub mod reset;
pub mod rollover;
pub mod subscription;
pub mod usage;

// Checker
pub use checker::{
    AllowanceChecker, AllowanceDecision, RolloverBalance, SuggestedAction, UsageSnapshot,
};

// Deduction
pub use deduction::{DeductionBreakdown, WordDeductor};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity};

// Reset
pub use reset::{MonthlyReset, ResetOutcome};

// Data access
pub use rollover::{RolloverEntry, RolloverLedger};
pub use subscription::{AllowanceGate, Subscription, SubscriptionStore};
pub use usage::{UsageLedger, UsageRecord};
