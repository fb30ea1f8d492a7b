//! HTTP API server for the Capri assistant

pub mod assistant;
pub mod devices;
pub mod health;
pub mod voice;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::config::ApiServerConfig;
use crate::conversation::ConversationStore;
use crate::modules::HomeControlModule;
use crate::pipeline::{Orchestrator, Shutdown};

/// Shared state for API handlers
#[derive(Debug)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub conversations: ConversationStore,
    /// Present when home control is enabled
    pub home: Option<Arc<HomeControlModule>>,
}

impl ApiState {
    #[must_use]
    pub const fn new(
        orchestrator: Arc<Orchestrator>,
        conversations: ConversationStore,
        home: Option<Arc<HomeControlModule>>,
    ) -> Self {
        Self {
            orchestrator,
            conversations,
            home,
        }
    }
}

/// Build the router with all routes and layers
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router(Arc::clone(&state)))
        .merge(assistant::router(Arc::clone(&state)))
        .merge(devices::router(Arc::clone(&state)))
        .merge(voice::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// HTTP API server
#[derive(Debug)]
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: Arc<ApiState>, config: &ApiServerConfig) -> Self {
        Self {
            state,
            host: config.host.clone(),
            port: config.port,
        }
    }

    /// Serve until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server on {addr}: {e}")))?;

        tracing::info!(addr = %addr, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}

/// API errors rendered as `{"error": {"code", "message"}}`
#[derive(Debug)]
pub enum ApiError {
    NotConfigured(&'static str),
    BadRequest(String),
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotConfigured(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                msg.to_string(),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_failed", msg),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
