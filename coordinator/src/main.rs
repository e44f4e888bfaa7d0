use anyhow::Result;
use coordinator::CoordinatorConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => CoordinatorConfig::load(path)?,
        None => CoordinatorConfig::default().with_overrides(|key| std::env::var(key).ok()),
    };
    info!("Using catalog at {}", config.database.url);

    // The coordinator stops once the last sender is dropped
    let _handle = coordinator::start(config)?;
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
