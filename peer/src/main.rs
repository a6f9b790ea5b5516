//! RepSync Peer binary.

use repsync_peer::config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "repsync_peer=debug,repsync_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        role = %config.role,
        peer = config.peer_url.as_deref().unwrap_or("none"),
        data_dir = %config.data_dir.display(),
        "Starting RepSync peer on {}:{}",
        config.host,
        config.port
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = repsync_peer::start(config)?;
    let app = repsync_peer::app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Peer listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
