use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    api::handler::AppState,
    config::Config,
    error::AppResult,
    ledger::repository::LedgerRepository,
    settlement::{guard::RefundGuard, scheduler::PayoutScheduler, SettlementOrchestrator},
    settlement::retry::RetryPolicy,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;

    // Core components
    let ledger = Arc::new(LedgerRepository::new(pool.clone()));

    let guard = RefundGuard::new(config.dispute_window());
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        ledger.clone(),
        guard,
        config.fee_schedules.clone(),
        RetryPolicy::default(),
    )?);
    info!(
        "✅ Settlement orchestrator initialized ({} fee schedule(s), {} day dispute window)",
        config.fee_schedules.len(),
        config.dispute_window_days
    );

    // Payout scheduler
    let scheduler = Arc::new(PayoutScheduler::new(
        config.payout_schedule(),
        config.dispute_window(),
        ledger.clone(),
        orchestrator.clone(),
    ));
    scheduler.clone().start();
    info!("✅ Payout scheduler started ({:?})", config.payout_frequency);

    Ok(AppState {
        ledger,
        orchestrator,
        scheduler,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
