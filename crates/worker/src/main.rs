#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Receiptly background worker
//!
//! Scheduled jobs that keep subscription state honest without any inbound
//! traffic:
//! - Period boundary realization (hourly): deferred cancellations and
//!   expired trials take effect
//! - Monthly usage reset (first of the month, 00:05 UTC)
//! - Repeating discount countdown (first of the month, 00:10 UTC)
//! - Invariant sweep (daily at 02:00 UTC)
//! - Heartbeat (every 5 minutes)

use std::time::Duration;

use receiptly_billing::{
    ChangeNotifier, CouponService, InvariantChecker, LifecycleManager, UsageCounter,
    ViolationSeverity,
};
use receiptly_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Receiptly worker v{}", env!("CARGO_PKG_VERSION"));

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    info!("Database pool created");

    let notifier = ChangeNotifier::new();
    let lifecycle = LifecycleManager::new(pool.clone(), notifier.clone());
    let usage = UsageCounter::new(pool.clone(), notifier.clone());
    let coupons = CouponService::new(pool.clone(), notifier);
    let invariants = InvariantChecker::new(pool.clone());

    let scheduler = JobScheduler::new().await?;

    // Job 1: Realize period boundaries (hourly at :02)
    // Deferred cancellations and expired trials become effective here, not
    // at webhook time, so processor outages delay but never lose them.
    let boundary_lifecycle = lifecycle.clone();
    scheduler
        .add(Job::new_async("0 2 * * * *", move |_uuid, _l| {
            let lifecycle = boundary_lifecycle.clone();
            Box::pin(async move {
                info!("Running period boundary realization");
                match lifecycle.realize_period_boundaries().await {
                    Ok(orgs) if orgs.is_empty() => {
                        info!("No period boundaries to realize");
                    }
                    Ok(orgs) => {
                        info!(count = orgs.len(), "Realized period boundaries");
                        for org_id in orgs {
                            info!(org_id = %org_id, "Subscription crossed a period boundary");
                        }
                    }
                    Err(e) => error!(error = %e, "Period boundary realization failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: period boundary realization (hourly)");

    // Job 2: Monthly usage reset (00:05 UTC on the 1st)
    let reset_usage = usage.clone();
    scheduler
        .add(Job::new_async("0 5 0 1 * *", move |_uuid, _l| {
            let usage = reset_usage.clone();
            Box::pin(async move {
                info!("Running monthly usage reset");
                let org_ids = match usage.all_org_ids().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        error!(error = %e, "Failed to list organizations for usage reset");
                        return;
                    }
                };

                let total = org_ids.len();
                let mut reset = 0usize;
                let mut errors = 0usize;
                for org_id in org_ids {
                    match usage.reset_monthly_usage(org_id).await {
                        Ok(true) => reset += 1,
                        Ok(false) => {}
                        Err(e) => {
                            error!(org_id = %org_id, error = %e, "Usage reset failed");
                            errors += 1;
                        }
                    }
                }

                info!(total, reset, errors, "Monthly usage reset complete");
            })
        })?)
        .await?;
    info!("Scheduled: monthly usage reset (1st of month, 00:05 UTC)");

    // Job 3: Repeating discount countdown (00:10 UTC on the 1st)
    let tick_coupons = coupons.clone();
    scheduler
        .add(Job::new_async("0 10 0 1 * *", move |_uuid, _l| {
            let coupons = tick_coupons.clone();
            Box::pin(async move {
                info!("Ticking repeating coupon discounts");
                match coupons.tick_repeating_discounts().await {
                    Ok(expired) => {
                        info!(expired, "Repeating discount tick complete");
                    }
                    Err(e) => error!(error = %e, "Repeating discount tick failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: repeating discount countdown (1st of month, 00:10 UTC)");

    // Job 4: Invariant sweep (daily at 02:00 UTC)
    let sweep_invariants = invariants.clone();
    scheduler
        .add(Job::new_async("0 0 2 * * *", move |_uuid, _l| {
            let invariants = sweep_invariants.clone();
            Box::pin(async move {
                info!("Running invariant sweep");
                match invariants.run_all_checks().await {
                    Ok(summary) => {
                        if summary.violations.is_empty() {
                            info!(
                                checks_run = summary.checks_run,
                                "Invariant sweep clean"
                            );
                        } else {
                            for violation in &summary.violations {
                                if violation.severity == ViolationSeverity::Critical {
                                    error!(
                                        invariant = %violation.invariant,
                                        severity = %violation.severity,
                                        description = %violation.description,
                                        "Invariant violation"
                                    );
                                } else {
                                    warn!(
                                        invariant = %violation.invariant,
                                        severity = %violation.severity,
                                        description = %violation.description,
                                        "Invariant violation"
                                    );
                                }
                            }
                            warn!(
                                checks_run = summary.checks_run,
                                checks_failed = summary.checks_failed,
                                violations = summary.violations.len(),
                                "Invariant sweep found violations"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: invariant sweep (daily at 02:00 UTC)");

    // Job 5: Heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat");
            })
        })?)
        .await?;
    info!("Scheduled: heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Receiptly worker started with 5 scheduled jobs");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
