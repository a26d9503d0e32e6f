use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rss_update_notifier::config::{Config, DEFAULT_ERROR_LOG};
use rss_update_notifier::diagnostics::DiagnosticLog;
use rss_update_notifier::runner::run_configured;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rss_update_notifier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("RSS_NOTIFIER_CONFIG").unwrap_or_else(|_| "notifier.toml".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            DiagnosticLog::new(DEFAULT_ERROR_LOG)
                .record("configuration load failed", &e)
                .await;
            return Err(e.into());
        }
    };
    info!("Loaded {} feeds from {}", config.feeds.len(), config_path);

    let report = run_configured(&config).await?;

    info!(
        "Run complete: {} new, {} changed, {} unchanged, {} skipped",
        report.first_seen,
        report.changed,
        report.unchanged,
        report.skipped_sources.len()
    );

    Ok(())
}
