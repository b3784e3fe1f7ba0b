//! Inkroom server binary.

use inkroom_server::{ServerConfig, serve};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkroom_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    info!(
        "Queue capacity {}, room grace {:?}, idle timeout {:?}",
        config.queue_capacity, config.room_grace, config.idle_timeout
    );

    if let Err(e) = serve(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
