//! Monitor HTTP surface
//!
//! Serves the dashboard page and the statistics API it polls:
//! `GET /api/stats` for a snapshot and `GET /api/reset` to clear it.

use crate::statistic::{StatisticManager, StatsSnapshot};
use crate::Result;
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// Monitor server bound at gateway construction time.
pub struct Monitor {
    listener: TcpListener,
    local_addr: SocketAddr,
    statistic: Arc<StatisticManager>,
}

impl Monitor {
    pub async fn bind(port: u16, statistic: Arc<StatisticManager>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        Ok(Monitor {
            listener,
            local_addr,
            statistic,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self) -> Result<()> {
        info!("monitor listening on http://{}", self.local_addr);
        axum::serve(self.listener, router(self.statistic)).await?;
        Ok(())
    }
}

/// Build the monitor router; separate from [`Monitor`] so tests can drive
/// it without a socket.
pub fn router(statistic: Arc<StatisticManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(dashboard))
        .route("/api/stats", get(stats))
        .route("/api/reset", get(reset))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(statistic)
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn stats(State(statistic): State<Arc<StatisticManager>>) -> Json<StatsSnapshot> {
    Json(statistic.snapshot())
}

async fn reset(State(statistic): State<Arc<StatisticManager>>) -> Json<Value> {
    statistic.reset();
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_response(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_stats_endpoint_shape() {
        let statistic = Arc::new(StatisticManager::new());
        statistic.add("c1", "10.0.0.1".to_string(), 4242);
        statistic.update("c1", 12, 34);
        let app = router(statistic);

        let (status, body) = get_response(&app, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["stats"]["total_connections"], 1);
        assert_eq!(value["stats"]["active_connections"], 1);
        assert_eq!(value["stats"]["total_bytes_in"], 12);
        assert_eq!(value["stats"]["total_bytes_out"], 34);
        assert!(value["stats"]["uptime"].is_u64());
        let conn = &value["connections"][0];
        assert_eq!(conn["id"], "c1");
        assert_eq!(conn["host"], "10.0.0.1");
        assert_eq!(conn["port"], 4242);
        assert_eq!(conn["status"], "active");
    }

    #[tokio::test]
    async fn test_reset_endpoint_clears_stats() {
        let statistic = Arc::new(StatisticManager::new());
        statistic.add("c1", "10.0.0.1".to_string(), 4242);
        let app = router(statistic);

        let (status, body) = get_response(&app, "/api/reset").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "ok");

        let (_, body) = get_response(&app, "/api/stats").await;
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["stats"]["total_connections"], 0);
        assert!(value["connections"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dashboard_is_html() {
        let app = router(Arc::new(StatisticManager::new()));
        let (status, body) = get_response(&app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let app = router(Arc::new(StatisticManager::new()));
        let (status, _) = get_response(&app, "/api/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
