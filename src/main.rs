use snapshot_service::{config::Config, startup::Application};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let default_filter = if config.debug {
        "info,snapshot_service=debug"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let application = Application::build(config)?;
    application.run_once().await?;

    Ok(())
}
