use session_matcher::config::Settings;
use session_matcher::{PairingEngine, PostgresStore, Sweeper};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Sweep worker: pairs whatever the enqueue path left waiting
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging; RUST_LOG overrides the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if settings.logging.format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }

    info!("Starting session matcher sweep worker...");

    let store = PostgresStore::from_settings(
        &settings.database.url,
        settings.database.max_connections,
        settings.database.min_connections,
        settings.database.acquire_timeout_secs,
        settings.database.idle_timeout_secs,
    )
    .await
    .map_err(|e| {
        error!("Failed to connect to PostgreSQL: {}", e);
        e
    })?;

    info!(
        "PostgreSQL store initialized (max: {} connections)",
        settings.database.max_connections.unwrap_or(10)
    );

    let titles = settings.matching.title_catalog();
    info!("Title catalog loaded with {} entries", titles.len());

    let sweeper = Sweeper::new(PairingEngine::new(store, titles));
    let period = Duration::from_secs(settings.matching.sweep_interval_secs.max(1));
    info!("Sweeping every {}s", period.as_secs());

    let passes = sweeper.run(period, tokio::signal::ctrl_c()).await;
    info!("Sweep worker stopped after {} passes", passes);

    Ok(())
}
