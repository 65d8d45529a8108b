//! HTTP trigger: every `POST /` runs one rotation.

use crate::trigger::Rotation;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;

pub(crate) async fn serve(addr: SocketAddr, rotation: Rotation) -> anyhow::Result<()> {
    let app = router(Arc::new(rotation));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening for rotation triggers on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(rotation: Arc<Rotation>) -> Router {
    Router::new()
        .route("/", post(rotate))
        .route("/health", get(|| async { "ok" }))
        .with_state(rotation)
}

async fn rotate(State(rotation): State<Arc<Rotation>>) -> (StatusCode, String) {
    info!("triggered over HTTP");
    // The HTTP clients are blocking, keep them off the async workers.
    match tokio::task::spawn_blocking(move || rotation.run()).await {
        Ok(Ok(_)) => (StatusCode::OK, "OK".to_string()),
        Ok(Err(err)) => {
            crate::log_error(&err);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
        Err(err) => {
            error!("the rotation task did not complete: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "the rotation task did not complete".to_string(),
            )
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for the shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
