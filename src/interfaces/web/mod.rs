mod router;
pub mod signature;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::sync::SyncEngine;

/// Bind and serve the HTTP boundary. Runs until the listener fails;
/// the scheduler keeps ticking on its own tasks in the meantime.
pub async fn serve(port: u16, engine: Arc<SyncEngine>, webhook_secret: String) -> Result<()> {
    let state = router::AppState {
        engine,
        webhook_secret,
    };
    let app = router::build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server running on port {port}");
    info!("Webhook URL: http://localhost:{port}/api/webhook/github");
    axum::serve(listener, app).await?;
    Ok(())
}
