use signcap::app::App;
use signcap::config::Config;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting signcap capture daemon");

    let config = Config::load()?;
    config.validate()?;

    let app = App::new(config).await?;
    app.run().await
}
