use std::net::SocketAddr;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::node::StatusHandle;

#[derive(Debug, Serialize)]
struct StatusResponse {
    node: String,
    leader: String,
    is_leader: bool,
    timestamp: String,
}

/// Routes of the status endpoint.
pub fn router(status: StatusHandle) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(status_handler))
        .route("/healthz", get(healthz_handler))
        .layer(cors)
        .with_state(status)
}

/// Serves the status endpoint on `addr` until `cancel` fires.
pub async fn run_status_server(addr: SocketAddr, status: StatusHandle, cancel: CancellationToken) {
    let app = router(status);

    tracing::info!(addr = %addr, "Starting status server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind status server");
            return;
        }
    };

    let shutdown = async move { cancel.cancelled().await };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "Status server failed");
    }
}

async fn status_handler(State(status): State<StatusHandle>) -> impl IntoResponse {
    let snapshot = status.snapshot().await;

    Json(StatusResponse {
        node: snapshot.node.clone(),
        leader: snapshot.leader.clone(),
        is_leader: snapshot.is_leader,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

async fn healthz_handler() -> &'static str {
    "ok"
}
