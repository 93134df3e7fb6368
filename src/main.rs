//! inbox-pilot - Entry point for the headless inbox assistant

use anyhow::Context;
use inbox_pilot::config::Settings;
use inbox_pilot::App;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting inbox-pilot");

    let path = Settings::default_path()?;
    let settings = Settings::load(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    let app = App::from_settings(settings).await?;
    if let Err(e) = app.run().await {
        tracing::error!("Application error: {:#}", e);
        return Err(e);
    }
    Ok(())
}
