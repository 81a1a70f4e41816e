//! Read-only status HTTP endpoint.
//!
//! - `GET /healthz`                       — always 200 (process alive)
//! - `GET /api/v1/status`                 — one row per watcher
//! - `GET /api/v1/servers/{id}/metrics`   — dispatcher metrics, 404 if unknown
//!
//! No authentication; bind it to loopback or a management network.

use crate::manager::WatcherManager;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Bind and serve in the background; returns the bound address.
pub async fn serve(
    bind: &str,
    manager: Arc<WatcherManager>,
) -> Result<SocketAddr, std::io::Error> {
    let app = router(manager);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "status http server exited");
        }
    });
    Ok(addr)
}

fn router(manager: Arc<WatcherManager>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/status", get(list_status))
        .route("/api/v1/servers/{id}/metrics", get(server_metrics))
        .with_state(manager)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_status(State(manager): State<Arc<WatcherManager>>) -> impl IntoResponse {
    Json(manager.summaries().await)
}

async fn server_metrics(
    State(manager): State<Arc<WatcherManager>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match manager.metrics(id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, "unknown server").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerConfig;
    use aegis_events::EventBus;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn http_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn healthz_and_status_respond() {
        let manager = WatcherManager::new(EventBus::default(), ManagerConfig::default());
        let addr = serve("127.0.0.1:0", manager).await.unwrap();

        let health = http_get(addr, "/healthz").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("ok"));

        let status = http_get(addr, "/api/v1/status").await;
        assert!(status.starts_with("HTTP/1.1 200"));
        assert!(status.ends_with("[]"));

        let missing = http_get(addr, &format!("/api/v1/servers/{}/metrics", Uuid::new_v4())).await;
        assert!(missing.starts_with("HTTP/1.1 404"));
    }
}
