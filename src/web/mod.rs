//! HTTP interface exposing the publisher's accessors as JSON.

pub mod config;
pub mod handlers;
pub mod router;

// Re-export commonly used items
pub use config::WebConfig;
pub use router::create_app;

use crate::error::{MonitorError, Result};
use crate::publisher::Publisher;
use crate::shutdown::Shutdown;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Serve the API until `shutdown` fires.
pub async fn start_web_server(
    config: WebConfig,
    publisher: Arc<Publisher>,
    shutdown: Shutdown,
) -> Result<()> {
    let app = create_app(&config, publisher);

    // Parse the bind address
    let addr = config
        .bind_address()
        .parse::<SocketAddr>()
        .map_err(|e| MonitorError::config_error(format!("Invalid bind address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MonitorError::web_server_error(format!("Failed to bind to address: {}", e)))?;

    info!("Boltwood web interface on http://{}", addr);
    info!("API endpoints under http://{}/api/", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await
        .map_err(|e| MonitorError::web_server_error(format!("Server error: {}", e)))?;

    Ok(())
}
