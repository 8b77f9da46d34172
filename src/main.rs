use std::process::ExitCode;

use liveshare_relay::core::config::Config;
use liveshare_relay::core::server;
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is not set
const DEFAULT_LOG_FILTER: &str = "liveshare_relay=info,tower_http=info";

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let result = match Config::from_env() {
        Ok(config) => {
            tracing::info!(
                "Config loaded: port={}, ping_interval={:?}, send_timeout={:?}, outgoing_buffer={}",
                config.port,
                config.ping_interval,
                config.send_timeout,
                config.outgoing_buffer_size
            );
            server::run(config).await
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => {
            tracing::info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
