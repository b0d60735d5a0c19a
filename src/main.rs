mod cascade;
mod circuit_breaker;
mod config;
mod db;
mod errors;
mod gateway;
mod models;
mod notifier;
mod retry_engine;
mod storage;
mod trust_score;
mod vouch_ledger;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::Database;
use crate::gateway::HttpPaymentsGateway;
use crate::notifier::{LogNotifier, Notifier, WebhookNotifier};
use crate::retry_engine::PaymentRetryEngine;
use crate::storage::postgres::PgStorage;

/// Seconds between scheduler ticks. Each tick runs one retry batch and
/// one restriction sweep, sequentially, so batches never overlap.
const TICK_INTERVAL_SECS: u64 = 3600;

/// Main entry point for the risk engine scheduler.
///
/// Initializes logging, configuration and the database pool, wires the
/// retry engine with its gateway and notifier, then runs collection
/// batches on a fixed interval.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerlend_risk=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let storage = Arc::new(PgStorage::new(db.pool.clone()));

    let payments_gateway = HttpPaymentsGateway::new(
        config.gateway_base_url.clone(),
        config.gateway_token.clone(),
    )?;
    tracing::info!(
        "✓ Payments gateway client initialized: {}",
        config.gateway_base_url
    );

    let notifier: Arc<dyn Notifier> = match &config.notifier_webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url.clone())?;
            tracing::info!("✓ Webhook notifier initialized: {}", url);
            Arc::new(webhook)
        }
        None => {
            tracing::info!("No notifier webhook configured; logging notifications only");
            Arc::new(LogNotifier)
        }
    };

    let engine = PaymentRetryEngine::new(
        storage,
        Arc::new(payments_gateway),
        notifier,
        config.retry_batch_size,
    );

    tracing::info!(
        "Risk engine scheduler started: one batch every {} seconds",
        TICK_INTERVAL_SECS
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
    loop {
        ticker.tick().await;
        let now = Utc::now();

        match engine.run_batch(now).await {
            Ok(summary) => {
                if !summary.errors.is_empty() {
                    tracing::warn!(
                        "Batch finished with {} error(s): {:?}",
                        summary.errors.len(),
                        summary.errors
                    );
                }
            }
            Err(e) => {
                tracing::error!("✗ Retry batch failed: {}", e);
            }
        }

        match engine.lift_expired_restrictions(now).await {
            Ok(0) => {}
            Ok(lifted) => tracing::info!("Restriction sweep lifted {} block(s)", lifted),
            Err(e) => tracing::error!("✗ Restriction sweep failed: {}", e),
        }
    }
}
