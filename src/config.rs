use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub gateway_base_url: String,
    pub gateway_token: String,
    pub notifier_webhook_url: Option<String>, // Optional; falls back to log-only notifications
    pub retry_batch_size: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            gateway_base_url: std::env::var("GATEWAY_BASE_URL")
                .map_err(|_| anyhow::anyhow!("GATEWAY_BASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("GATEWAY_BASE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("GATEWAY_BASE_URL must start with http:// or https://");
                    }
                    Ok(url)
                })?,
            gateway_token: std::env::var("GATEWAY_TOKEN")
                .map_err(|_| anyhow::anyhow!("GATEWAY_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("GATEWAY_TOKEN cannot be empty");
                    }
                    Ok(token)
                })?,
            notifier_webhook_url: std::env::var("NOTIFIER_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            retry_batch_size: std::env::var("RETRY_BATCH_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RETRY_BATCH_SIZE must be a positive number"))
                .and_then(|n: i64| {
                    if n <= 0 {
                        anyhow::bail!("RETRY_BATCH_SIZE must be a positive number");
                    }
                    Ok(n)
                })?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Gateway Base URL: {}", config.gateway_base_url);
        if let Some(ref webhook) = config.notifier_webhook_url {
            tracing::info!("Notifier webhook configured: {}", webhook);
        }
        tracing::debug!("Retry batch size: {}", config.retry_batch_size);

        Ok(config)
    }
}
