mod reset_runner;

use std::time::Duration;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memoledger_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections: u32 = std::env::var("WORKER_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2);

    let pool = memoledger_shared::create_pool(&database_url, max_connections)
        .await
        .context("Failed to create database pool")?;

    info!("memoledger worker starting");

    // Run a catch-up sweep immediately so a worker deployed mid-month picks
    // up any orgs a missed boundary run left behind
    reset_runner::process_due_resets(&pool).await;

    let scheduler = JobScheduler::new()
        .await
        .context("Failed to create job scheduler")?;

    // Month boundary: 00:05 UTC on the 1st
    let boundary_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 5 0 1 * *", move |_uuid, _lock| {
            let pool = boundary_pool.clone();
            Box::pin(async move {
                info!("Month boundary reset run");
                reset_runner::process_due_resets(&pool).await;
            })
        })?)
        .await
        .context("Failed to schedule month boundary job")?;

    // Hourly catch-up for orgs the boundary run missed (new subscriptions,
    // transient failures, worker downtime over the boundary)
    let catchup_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 15 * * * *", move |_uuid, _lock| {
            let pool = catchup_pool.clone();
            Box::pin(async move {
                reset_runner::process_due_resets(&pool).await;
            })
        })?)
        .await
        .context("Failed to schedule catch-up job")?;

    scheduler.start().await.context("Failed to start scheduler")?;

    info!("memoledger worker running; reset jobs scheduled");

    // Keep the process alive; the scheduler runs on background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        if pool.is_closed() {
            error!("Database pool closed unexpectedly, shutting down");
            break;
        }
    }

    Ok(())
}
