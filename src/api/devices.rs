//! Device listing and control endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ApiError, ApiState};
use crate::error::DeviceError;
use crate::modules::HomeControlModule;
use crate::modules::home_control::{Action, Device, DeviceSummary, failure_message};

/// Build devices router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/devices", get(list_devices))
        .route("/api/devices/control", post(control_device))
        .route("/api/devices/{id}/refresh", post(refresh_device))
        .with_state(state)
}

/// Device listing
#[derive(Debug, Serialize)]
pub struct DeviceList {
    pub devices: Vec<DeviceSummary>,
}

/// Control request
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub device_id: String,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Outcome of a control or refresh call
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub device_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl ControlResponse {
    const fn status_for(error: &DeviceError) -> StatusCode {
        match error {
            DeviceError::NotFound(_) => StatusCode::NOT_FOUND,
            DeviceError::UnsupportedAction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DeviceError::ProtocolError(_) => StatusCode::BAD_GATEWAY,
            DeviceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    const fn code_for(error: &DeviceError) -> &'static str {
        match error {
            DeviceError::NotFound(_) => "not_found",
            DeviceError::UnsupportedAction { .. } => "unsupported_action",
            DeviceError::ProtocolError(_) => "protocol_error",
            DeviceError::Timeout(_) => "timeout",
        }
    }

    async fn failed(home: &HomeControlModule, id: &str, error: &DeviceError) -> Response {
        let cached = home.registry().get(id).await;
        let body = Self {
            success: false,
            device_id: id.to_string(),
            message: failure_message(error, cached.as_ref().map(Device::spoken_name).as_deref()),
            device: cached.as_ref().map(Device::summary),
            error: Some(Self::code_for(error)),
        };
        (Self::status_for(error), Json(body)).into_response()
    }
}

fn home(state: &ApiState) -> Result<&Arc<HomeControlModule>, ApiError> {
    state
        .home
        .as_ref()
        .ok_or(ApiError::NotConfigured("home control is disabled"))
}

async fn list_devices(State(state): State<Arc<ApiState>>) -> Result<Json<DeviceList>, ApiError> {
    let home = home(&state)?;
    let devices = home
        .registry()
        .snapshot()
        .await
        .iter()
        .map(Device::summary)
        .collect();
    Ok(Json(DeviceList { devices }))
}

async fn control_device(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ControlRequest>,
) -> Result<Response, ApiError> {
    let home = home(&state)?;

    let action = Action::from_request(&request.action, &request.params).ok_or_else(|| {
        ApiError::BadRequest(format!("unsupported action: {}", request.action))
    })?;

    tracing::debug!(device = %request.device_id, action = ?action, "control request");

    match home.control(&request.device_id, action).await {
        Ok(device) => {
            let body = ControlResponse {
                success: true,
                device_id: request.device_id,
                message: action.confirmation(&device),
                device: Some(device.summary()),
                error: None,
            };
            Ok((StatusCode::OK, Json(body)).into_response())
        }
        Err(e) => Ok(ControlResponse::failed(home, &request.device_id, &e).await),
    }
}

async fn refresh_device(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let home = home(&state)?;

    match home.refresh(&id).await {
        Ok(device) => {
            let body = ControlResponse {
                success: true,
                message: format!(
                    "The {} is {}.",
                    device.spoken_name(),
                    device.status.as_deref().unwrap_or("unknown")
                ),
                device_id: id,
                device: Some(device.summary()),
                error: None,
            };
            Ok((StatusCode::OK, Json(body)).into_response())
        }
        Err(e) => Ok(ControlResponse::failed(home, &id, &e).await),
    }
}
