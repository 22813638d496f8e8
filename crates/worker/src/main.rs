//! Cirrus Background Worker
//!
//! Handles scheduled jobs including:
//! - Billing sweep over due storage buckets (at startup, then every 6 hours)
//! - Notification outbox delivery (every minute)
//! - Resumption of interrupted rename migrations (at startup)
//! - Health check heartbeat (every 5 minutes)

mod notification_sender;

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use cirrus_api::state::build_object_store;
use cirrus_shared::{Config, Notifier};
use cirrus_storage::{BucketLifecycle, ChargeRunner, SweepSummary};

fn log_sweep_summary(summary: &SweepSummary) {
    info!(
        due = summary.due,
        charged = summary.charged,
        entered_grace = summary.entered_grace,
        suspended = summary.suspended,
        errors = summary.errors,
        "Billing sweep cycle complete"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Cirrus Worker");

    let config = Config::from_env()?;
    let pool = cirrus_shared::create_pool(&config.database_url).await?;
    cirrus_shared::run_migrations(&pool).await?;

    let store = build_object_store(&config);
    let notifier = Notifier::new(pool.clone());
    let charges = Arc::new(ChargeRunner::new(pool.clone(), notifier.clone()));
    let lifecycle = Arc::new(BucketLifecycle::new(
        pool.clone(),
        store,
        notifier.clone(),
    ));

    // Finish any rename migration a previous process left behind before
    // the sweep can touch those buckets.
    match lifecycle.resume_incomplete_migrations().await {
        Ok(0) => {}
        Ok(resumed) => info!(resumed = resumed, "Resumed interrupted rename migrations"),
        Err(e) => error!(error = %e, "Failed to resume rename migrations"),
    }

    // The sweep runs once immediately so a restarted worker never waits six
    // hours to bill overdue buckets.
    info!("Running startup billing sweep");
    match charges.run_sweep().await {
        Ok(summary) => log_sweep_summary(&summary),
        Err(e) => error!(error = %e, "Startup billing sweep failed"),
    }

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Billing sweep every 6 hours
    // Cron: At minute 0 past every 6th hour (0:00, 6:00, 12:00, 18:00 UTC)
    let sweep_charges = charges.clone();
    scheduler
        .add(Job::new_async("0 0 */6 * * *", move |_uuid, _l| {
            let charges = sweep_charges.clone();
            Box::pin(async move {
                info!("Running scheduled billing sweep");
                match charges.run_sweep().await {
                    Ok(summary) => log_sweep_summary(&summary),
                    Err(e) => error!(error = %e, "Billing sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing sweep (every 6 hours)");

    // Job 2: Notification outbox delivery (every minute)
    let outbox_notifier = notifier.clone();
    let webhook_url = config.notification_webhook_url.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let notifier = outbox_notifier.clone();
            let webhook_url = webhook_url.clone();
            Box::pin(async move {
                let http_client = reqwest::Client::new();
                notification_sender::deliver_pending(
                    &notifier,
                    &http_client,
                    webhook_url.as_deref(),
                )
                .await;
            })
        })?)
        .await?;
    info!("Scheduled: Notification delivery (every minute)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Cirrus Worker started successfully with 3 scheduled jobs");

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
