//! Payout scheduler - releases held teacher earnings once the dispute
//! window has elapsed.
//!
//! Daily strategy (recommended):
//! - Executes at 02:00 UTC (off-peak hours)
//! - Sweeps purchases past their dispute window and approved grading
//!   allocations in one cycle
//! - Blocked and already-settled references are skipped, not failed; a
//!   blocked purchase re-evaluates on every later cycle
//!
//! Alternative: Interval mode for high-volume deployments.
//!
//! The scheduler never retries a failed reference within a cycle; the
//! settlement operations are idempotent per reference, so re-invocation on
//! the next cycle is safe.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use crate::ledger::repository::LedgerRepository;
use crate::settlement::orchestrator::{SettlementOrchestrator, SettlementOutcome};

/// Payout schedule configuration
#[derive(Debug, Clone)]
pub struct PayoutScheduleConfig {
    /// Payout frequency: "daily" or "interval"
    pub frequency: PayoutFrequency,
    /// UTC hour to execute the daily sweep (0-23)
    pub execution_hour: u32,
    /// Minutes between sweeps in interval mode
    pub interval_minutes: u64,
    /// Max references processed per cycle
    pub batch_size: i64,
}

impl Default for PayoutScheduleConfig {
    fn default() -> Self {
        Self {
            frequency: PayoutFrequency::Daily,
            execution_hour: 2,
            interval_minutes: 60,
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutFrequency {
    Daily,
    Interval,
}

/// Summary of one payout cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct PayoutCycleSummary {
    pub purchases_released: u64,
    pub purchases_deferred: u64,
    pub allocations_released: u64,
    pub failures: u64,
}

/// Payout scheduler - coordinates the periodic release of held funds
pub struct PayoutScheduler {
    config: PayoutScheduleConfig,
    dispute_window: ChronoDuration,
    ledger: Arc<LedgerRepository>,
    orchestrator: Arc<SettlementOrchestrator>,
}

impl PayoutScheduler {
    pub fn new(
        config: PayoutScheduleConfig,
        dispute_window: ChronoDuration,
        ledger: Arc<LedgerRepository>,
        orchestrator: Arc<SettlementOrchestrator>,
    ) -> Self {
        Self {
            config,
            dispute_window,
            ledger,
            orchestrator,
        }
    }

    /// Start the payout scheduler (runs in background)
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let scheduler = self;

        tokio::spawn(async move {
            match scheduler.config.frequency {
                PayoutFrequency::Daily => scheduler.run_daily().await,
                PayoutFrequency::Interval => scheduler.run_interval().await,
            }
        })
    }

    /// Daily mode - runs once per day at the configured hour
    async fn run_daily(&self) {
        loop {
            let now = Utc::now();
            let next_execution = Self::calculate_next_daily_execution(now, self.config.execution_hour);
            let duration_until_execution = next_execution.signed_duration_since(now);

            if duration_until_execution.num_seconds() > 0 {
                info!(
                    "⏰ Next payout sweep scheduled for: {} UTC",
                    next_execution.format("%H:%M:%S")
                );

                tokio::time::sleep(Duration::from_secs(
                    duration_until_execution.num_seconds() as u64,
                ))
                .await;
            }

            self.run_cycle().await;
        }
    }

    /// Interval mode - runs every `interval_minutes`
    async fn run_interval(&self) {
        let mut interval = interval(Duration::from_secs(self.config.interval_minutes * 60));

        loop {
            interval.tick().await;
            self.run_cycle().await;
        }
    }

    /// Execute one payout sweep. Also invoked directly by the admin trigger
    /// endpoint, so an external cron can drive the cadence instead.
    pub async fn run_cycle(&self) -> PayoutCycleSummary {
        info!("🔄 Starting payout sweep");
        let mut summary = PayoutCycleSummary::default();

        let cutoff = Utc::now() - self.dispute_window;
        match self
            .ledger
            .list_due_purchases(cutoff, self.config.batch_size)
            .await
        {
            Ok(purchases) => {
                for purchase in purchases {
                    match self
                        .orchestrator
                        .release_course_creation_fee(purchase.id)
                        .await
                    {
                        Ok(SettlementOutcome::Applied) => summary.purchases_released += 1,
                        Ok(SettlementOutcome::Deferred) => summary.purchases_deferred += 1,
                        Ok(SettlementOutcome::AlreadySettled) => {}
                        Err(err) => {
                            // Logged with context by the orchestrator; keep
                            // sweeping, the supervisor re-invokes us.
                            error!("Payout of purchase {} failed: {}", purchase.id, err);
                            summary.failures += 1;
                        }
                    }
                }
            }
            Err(err) => {
                error!("Failed to list due purchases: {}", err);
                summary.failures += 1;
            }
        }

        match self.ledger.list_due_allocations(self.config.batch_size).await {
            Ok(allocations) => {
                for allocation in allocations {
                    match self.orchestrator.release_grading_fee(allocation.id).await {
                        Ok(SettlementOutcome::Applied) => summary.allocations_released += 1,
                        Ok(_) => {}
                        Err(err) => {
                            error!("Payout of allocation {} failed: {}", allocation.id, err);
                            summary.failures += 1;
                        }
                    }
                }
            }
            Err(err) => {
                error!("Failed to list due allocations: {}", err);
                summary.failures += 1;
            }
        }

        info!(
            "✓ Payout sweep completed: {} purchases released, {} deferred, {} allocations released, {} failures",
            summary.purchases_released,
            summary.purchases_deferred,
            summary.allocations_released,
            summary.failures
        );
        summary
    }

    /// Calculate next daily execution time
    fn calculate_next_daily_execution(now: DateTime<Utc>, execution_hour: u32) -> DateTime<Utc> {
        let mut next = now.date_naive().and_hms_opt(execution_hour, 0, 0).unwrap();
        let next_dt = Utc.from_utc_datetime(&next);

        // If execution time has passed today, schedule for tomorrow
        if next_dt <= now {
            next = (now.date_naive() + ChronoDuration::days(1))
                .and_hms_opt(execution_hour, 0, 0)
                .unwrap();
            Utc.from_utc_datetime(&next)
        } else {
            next_dt
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn test_calculate_next_daily_execution() {
        // Current time: 2025-01-01 10:00:00 UTC
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();

        // Execution hour: 14:00 (today)
        let next = PayoutScheduler::calculate_next_daily_execution(now, 14);
        assert_eq!(next.hour(), 14);
        assert_eq!(next.day(), 1);

        // Execution hour: 09:00 (already passed, so tomorrow)
        let next = PayoutScheduler::calculate_next_daily_execution(now, 9);
        assert_eq!(next.hour(), 9);
        assert_eq!(next.day(), 2);
    }
}
