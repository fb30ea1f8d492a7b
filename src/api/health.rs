//! Service info and health check endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use super::ApiState;

/// Build info and health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(info))
        .route("/health", get(health))
        .with_state(state)
}

/// Service metadata
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub wake_word: String,
    pub modules: Vec<String>,
    pub endpoints: Vec<&'static str>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub components: Components,
}

/// Per-component availability
#[derive(Debug, Serialize)]
pub struct Components {
    pub modules: usize,
    pub home_control: CheckResult,
    pub conversations: usize,
}

/// Result of a single component check
#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn unavailable() -> Self {
        Self {
            status: "unavailable",
            message: Some("not configured".to_string()),
        }
    }
}

const ENDPOINTS: &[&str] = &[
    "GET /",
    "GET /health",
    "POST /api/chat",
    "GET /api/devices",
    "POST /api/devices/control",
    "POST /api/devices/{id}/refresh",
    "POST /api/tts",
];

async fn info(State(state): State<Arc<ApiState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: "capri",
        version: env!("CARGO_PKG_VERSION"),
        wake_word: state.orchestrator.wake_word_str().to_string(),
        modules: state
            .orchestrator
            .modules()
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect(),
        endpoints: ENDPOINTS.to_vec(),
    })
}

/// Liveness probe
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let home_control = match &state.home {
        Some(home) => {
            let devices = home.registry().len().await;
            CheckResult {
                message: Some(format!("{devices} devices")),
                ..CheckResult::ok()
            }
        }
        None => CheckResult::unavailable(),
    };

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        components: Components {
            modules: state.orchestrator.modules().len(),
            home_control,
            conversations: state.conversations.len().await,
        },
    })
}
