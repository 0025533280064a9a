use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden::config::Settings;
use warden::Application;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.logging.format.as_str() {
        "compact" => subscriber.compact().init(),
        _ => subscriber.pretty().init(),
    }

    info!(services = settings.services.len(), "Starting Warden");

    let app = Application::from_settings(settings)?;
    app.run().await?;

    Ok(())
}
