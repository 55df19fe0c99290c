//! Monthly reset runner
//!
//! Sweeps every organization that is due a reset for the current month and
//! rolls each one over independently. One org failing never blocks the rest;
//! failures are logged and picked up again by the hourly catch-up run.

use sqlx::PgPool;
use tracing::{error, info};

use memoledger_billing::MonthlyReset;

/// How a sweep went
#[derive(Debug, Default)]
pub struct SweepStats {
    pub orgs_reset: usize,
    pub orgs_failed: usize,
    pub words_rolled_over: i64,
    pub expired_entries_removed: u64,
}

/// Reset every org that has no usage record for the current month.
pub async fn process_due_resets(pool: &PgPool) -> SweepStats {
    let reset = MonthlyReset::new(pool.clone());
    let mut stats = SweepStats::default();

    let due = match reset.orgs_due_for_reset().await {
        Ok(orgs) => orgs,
        Err(e) => {
            error!(error = %e, "Failed to fetch orgs due for reset");
            return stats;
        }
    };

    if due.is_empty() {
        return stats;
    }

    info!(count = due.len(), "Running monthly allowance resets");

    for org_id in due {
        match reset.reset_monthly_allowance(org_id).await {
            Ok(outcome) => {
                stats.orgs_reset += 1;
                stats.words_rolled_over += outcome.unused_words_rolled_over;
                stats.expired_entries_removed += outcome.expired_entries_removed;
            }
            Err(e) => {
                stats.orgs_failed += 1;
                error!(org_id = %org_id, error = %e, "Monthly reset failed, will retry on next sweep");
            }
        }
    }

    info!(
        orgs_reset = stats.orgs_reset,
        orgs_failed = stats.orgs_failed,
        words_rolled_over = stats.words_rolled_over,
        expired_entries_removed = stats.expired_entries_removed,
        "Monthly reset sweep complete"
    );

    stats
}
