//! Text chat endpoint
//!
//! Each request runs the routing, responding and optional speaking chain
//! with its own state machine. Requests on different `context_id`s run
//! concurrently; one conversation is updated by one request at a time.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::modules::ModuleResult;
use crate::pipeline::{PipelineState, StateMachine};
use crate::voice::audio_mime;

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .with_state(state)
}

/// Chat request
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
    /// Conversation to continue; a new one is created when unknown
    #[serde(default)]
    pub context_id: Option<String>,
    /// Also synthesize the reply
    #[serde(default)]
    pub speak: bool,
}

/// Chat response
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub context_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ModuleResult>,
    pub fallback: bool,
    /// Base64 audio when `speak` was requested and synthesis succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_mime: Option<&'static str>,
}

async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.text.len() > 4096 {
        return Err(ApiError::BadRequest("text too long".to_string()));
    }

    let context_id = request
        .context_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let conversation = state.conversations.get_or_create(&context_id).await;
    let mut states = StateMachine::new();

    let outcome = {
        let mut context = conversation.write().await;
        state
            .orchestrator
            .respond(&mut context, &request.text, &mut states)
            .await
    };

    let (audio, mime) = if request.speak {
        states.transition(PipelineState::Speaking);
        match state.orchestrator.synthesize(&outcome.reply).await {
            Ok(bytes) => {
                let mime = audio_mime(&bytes);
                (
                    Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
                    Some(mime),
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, context_id = %context_id, "reply synthesis failed");
                states.transition(PipelineState::Error);
                (None, None)
            }
        }
    } else {
        (None, None)
    };
    states.transition(PipelineState::Idle);

    Ok(Json(ChatResponse {
        reply: outcome.reply,
        context_id,
        module: outcome.routing.module_id,
        result: outcome.module,
        fallback: outcome.fallback,
        audio,
        audio_mime: mime,
    }))
}
