use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;

use crate::collector::ConnectionStatus;
use crate::metrics::{self, HealthMetrics};

const INDEX_HTML: &str = include_str!("api/index.html");

/// State shared by all handlers. Handlers only ever read from it.
#[derive(Debug, Clone)]
pub struct AppState {
    metrics: Arc<HealthMetrics>,
    status: ConnectionStatus,
}

impl AppState {
    pub fn new(metrics: Arc<HealthMetrics>, status: ConnectionStatus) -> Self {
        Self { metrics, status }
    }
}

#[derive(Debug, serde::Serialize)]
struct HealthBody {
    status: &'static str,
    message: &'static str,
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn export_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            log::error!("Failed to encode metrics: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode metrics",
            )
                .into_response()
        }
    }
}

async fn health(State(state): State<AppState>) -> Response {
    if state.status.is_connected() {
        (
            StatusCode::OK,
            Json(HealthBody {
                status: "ok",
                message: "Connected to Docker API",
            }),
        )
            .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HealthBody {
                status: "error",
                message: "Not connected to Docker API",
            }),
        )
            .into_response()
    }
}

pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    pub fn new(state: AppState) -> Self {
        let router = axum::Router::new()
            .route("/", get(index))
            .route("/metrics", get(export_metrics))
            .route("/health", get(health))
            .with_state(state);
        Self { router }
    }

    pub fn into_router(self) -> axum::Router {
        self.router
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    pub async fn listen(
        self,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
    }
}
