use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memoledger_api::{routes, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memoledger_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    // Migrations run on a dedicated short-lived pool
    {
        let migration_pool = memoledger_shared::create_migration_pool(&config.database_url)
            .await
            .context("Failed to create migration pool")?;
        memoledger_shared::run_migrations(&migration_pool)
            .await
            .context("Failed to run migrations")?;
        migration_pool.close().await;
    }

    let pool = memoledger_shared::create_pool(
        &config.database_url,
        config.database_max_connections,
    )
    .await
    .context("Failed to create database pool")?;

    if config.internal_job_token.is_none() {
        tracing::warn!("INTERNAL_JOB_TOKEN not set; internal routes are disabled");
    }

    let state = AppState::new(pool, config.internal_job_token.clone());
    let app = routes::api_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;

    tracing::info!(address = %config.bind_address, "memoledger API listening");

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
