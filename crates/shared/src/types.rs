//! Common types used across memoledger

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Subscription plan for billing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanKey {
    Starter,
    Professional,
    Enterprise,
}

impl Default for PlanKey {
    fn default() -> Self {
        Self::Starter
    }
}

impl PlanKey {
    /// Monthly word allowance for this plan
    ///
    /// The subscription row carries the authoritative allowance (copied at
    /// signup/plan-change time); these are the plan defaults.
    pub fn monthly_words(&self) -> i64 {
        match self {
            Self::Starter => 10_000,
            Self::Professional => 50_000,
            Self::Enterprise => 250_000,
        }
    }
}

impl std::fmt::Display for PlanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanKey::Starter => write!(f, "starter"),
            PlanKey::Professional => write!(f, "professional"),
            PlanKey::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for PlanKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "starter" => Ok(PlanKey::Starter),
            "professional" => Ok(PlanKey::Professional),
            "enterprise" => Ok(PlanKey::Enterprise),
            _ => Err(format!("Unknown plan key: {}", s)),
        }
    }
}

/// Subscription lifecycle status
///
/// `cancelled` is terminal but the subscription remains usable until
/// `current_period_end` passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    /// Whether this status counts toward the one-non-terminal-subscription-per-org rule
    pub fn is_non_terminal(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Valid transitions in the subscription state machine:
    /// trial -> active | cancelled, active -> past_due | cancelled,
    /// past_due -> active | cancelled
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Trial, Active)
                | (Trial, Cancelled)
                | (Active, PastDue)
                | (Active, Cancelled)
                | (PastDue, Active)
                | (PastDue, Cancelled)
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionStatus::Trial => write!(f, "trial"),
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::PastDue => write!(f, "past_due"),
            SubscriptionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trial" => Ok(SubscriptionStatus::Trial),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" | "canceled" => Ok(SubscriptionStatus::Cancelled),
            _ => Err(format!("Unknown subscription status: {}", s)),
        }
    }
}
