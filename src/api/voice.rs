//! Text-to-speech endpoint

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Deserialize;

use super::{ApiError, ApiState};
use crate::voice::audio_mime;

/// Build TTS router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/tts", post(synthesize))
        .with_state(state)
}

/// Synthesis request
#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
}

/// Synthesize text to speech
///
/// Returns MP3 or WAV depending on the backend
async fn synthesize(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SynthesizeRequest>,
) -> Result<Response, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("empty text".to_string()));
    }

    let audio = state
        .orchestrator
        .synthesize(&request.text)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, audio_mime(&audio))],
        audio,
    )
        .into_response())
}
