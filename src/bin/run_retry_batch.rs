//! Script to run a single payment retry batch from the command line.

use std::sync::Arc;

use chrono::Utc;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

use peerlend_risk::gateway::HttpPaymentsGateway;
use peerlend_risk::notifier::{LogNotifier, Notifier, WebhookNotifier};
use peerlend_risk::retry_engine::{PaymentRetryEngine, DEFAULT_BATCH_SIZE};
use peerlend_risk::storage::postgres::PgStorage;

/// Main entry point for the one-shot batch runner.
///
/// Connects to the database, runs one collection batch followed by one
/// restriction sweep, logs the summary and exits. Useful for cron-driven
/// deployments and manual reruns.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    // Database connection
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let gateway_base_url = env::var("GATEWAY_BASE_URL").expect("GATEWAY_BASE_URL must be set");
    let gateway_token = env::var("GATEWAY_TOKEN").expect("GATEWAY_TOKEN must be set");
    let batch_size = env::var("RETRY_BATCH_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_BATCH_SIZE);

    let storage = Arc::new(PgStorage::new(pool));
    let gateway = Arc::new(HttpPaymentsGateway::new(gateway_base_url, gateway_token)?);
    let notifier: Arc<dyn Notifier> = match env::var("NOTIFIER_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => Arc::new(WebhookNotifier::new(url)?),
        _ => Arc::new(LogNotifier),
    };

    let engine = PaymentRetryEngine::new(storage, gateway, notifier, batch_size);

    tracing::info!("Connected to database. Running one retry batch...");
    let now = Utc::now();
    let summary = engine.run_batch(now).await?;

    let lifted = engine.lift_expired_restrictions(now).await?;

    tracing::info!(
        "Batch complete: {} processed, {} collected, {} rescheduled, {} defaulted, {} skipped, {} restriction(s) lifted.",
        summary.processed,
        summary.collected,
        summary.rescheduled,
        summary.defaulted,
        summary.skipped,
        lifted
    );
    for error in &summary.errors {
        tracing::warn!("Batch error: {}", error);
    }

    Ok(())
}
