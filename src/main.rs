use dotenv::dotenv;
use exchange_proxy::{Config, StartupError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "starting exchange proxy (upstream timeout {:?})",
        config.upstream_timeout
    );
    exchange_proxy::run(config).await
}
