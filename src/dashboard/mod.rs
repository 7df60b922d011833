//! Dashboard Module
//!
//! HTTP/WebSocket bridge between the browser dashboard and the orchestrator.
//! Only compiled when the `dashboard` feature is enabled.

mod api;
mod types;

pub use api::create_router;
pub use types::*;

use crate::sync::SyncOrchestrator;

/// Start the dashboard server
pub async fn start_server(orchestrator: SyncOrchestrator, port: u16) -> anyhow::Result<()> {
    let app = create_router(orchestrator);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("🖥️ Dashboard API starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
