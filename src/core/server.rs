//! Listener setup and shutdown handling

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::close_code;
use tokio::net::TcpListener;

use super::config::{Config, ConfigError};
use super::liveshare::{RelayState, RoomRegistry, SERVER_SHUTTING_DOWN, relay_router};

/// How long shutdown waits for connections to leave their rooms
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that stop the server process
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Bind the configured address and serve until a shutdown signal arrives
pub async fn run(config: Config) -> Result<(), ServerError> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let state = RelayState::new(config);

    tracing::info!("listening on http://{}", addr);
    tracing::info!("LiveShare WebSocket: ws://{}/{{room_id}}", addr);
    tracing::info!("Room control API: http://{}/api/rooms/{{room_id}}/end", addr);

    serve(listener, state, shutdown_signal())
        .await
        .map_err(ServerError::Serve)
}

/// Serve the relay on an already bound listener
///
/// When `shutdown` resolves, every connection is sent a going-away close frame,
/// the listener stops accepting, and the call returns once the rooms have
/// drained or `DRAIN_TIMEOUT` elapses.
pub async fn serve(
    listener: TcpListener,
    state: RelayState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let registry = state.registry.clone();
    let shutdown_registry = registry.clone();

    axum::serve(listener, relay_router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            let closing = shutdown_registry.close_all(close_code::AWAY, SERVER_SHUTTING_DOWN);
            tracing::info!(connections = closing, "Closing relay connections");
        })
        .await?;

    drain(&registry, DRAIN_TIMEOUT).await;
    Ok(())
}

/// Wait until every connection has left its room, up to `timeout`
async fn drain(registry: &Arc<RoomRegistry>, timeout: Duration) {
    let wait = async {
        while registry.room_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    if tokio::time::timeout(timeout, wait).await.is_err() {
        tracing::warn!(
            rooms = registry.room_count(),
            members = registry.total_member_count(),
            "Shutting down with connections still registered"
        );
    }
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
