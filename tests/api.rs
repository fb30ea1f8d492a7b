//! API endpoint integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use capri_voice::api::{self, ApiState};
use capri_voice::conversation::ConversationStore;
use capri_voice::modules::home_control::DeviceRegistry;
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{
    CannedGenerator, RecordingSpeaker, ScriptedTranscriber, home_module, orchestrator,
    spawn_device_server,
};

struct TestApp {
    router: axum::Router,
    generator: Arc<CannedGenerator>,
    registry: Option<Arc<DeviceRegistry>>,
}

/// Build a test API router, with home control when a device address is given
async fn build_test_app(with_home: bool) -> TestApp {
    let generator = Arc::new(CannedGenerator::new("It is sunny."));

    let (registry, home) = if with_home {
        let (addr, _server) = spawn_device_server().await;
        let (registry, home) = home_module(addr);
        (Some(registry), Some(home))
    } else {
        (None, None)
    };

    let orchestrator = orchestrator(
        home.clone(),
        Arc::clone(&generator),
        Arc::new(ScriptedTranscriber::saying("")),
        Arc::new(RecordingSpeaker::default()),
    );
    let state = Arc::new(ApiState::new(
        Arc::new(orchestrator),
        ConversationStore::new(8, 10),
        home,
    ));

    TestApp {
        router: api::router(state),
        generator,
        registry,
    }
}

async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_test_app(true).await;
    let (status, json) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["components"]["modules"], 1);
    assert_eq!(json["components"]["home_control"]["status"], "ok");
}

#[tokio::test]
async fn test_info_lists_modules_and_endpoints() {
    let app = build_test_app(true).await;
    let (status, json) = send(&app.router, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "capri");
    assert_eq!(json["wake_word"], "capri");
    assert_eq!(json["modules"], json!(["home_control"]));
    assert!(
        json["endpoints"]
            .as_array()
            .unwrap()
            .contains(&json!("POST /api/devices/control"))
    );
}

#[tokio::test]
async fn test_list_devices() {
    let app = build_test_app(true).await;
    let (status, json) = send(&app.router, get("/api/devices")).await;

    assert_eq!(status, StatusCode::OK);
    let devices = json["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 2);

    let light = devices.iter().find(|d| d["id"] == "bedroom_light").unwrap();
    assert_eq!(light["name"], "Bedroom Light");
    assert_eq!(light["type"], "light");
    assert_eq!(light["protocol"], "http");
    assert_eq!(light["status"], "offline");
}

#[tokio::test]
async fn test_control_device() {
    let app = build_test_app(true).await;
    let (status, json) = send(
        &app.router,
        post_json(
            "/api/devices/control",
            &json!({ "device_id": "bedroom_light", "action": "on" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["device"]["status"], "on");
    assert_eq!(json["message"], "Turning on the bedroom light.");

    let registry = app.registry.unwrap();
    assert_eq!(
        registry.get("bedroom_light").await.unwrap().status.as_deref(),
        Some("on")
    );
}

#[tokio::test]
async fn test_control_unknown_device() {
    let app = build_test_app(true).await;
    let registry = app.registry.clone().unwrap();
    let before = registry.to_file().await;

    let (status, json) = send(
        &app.router,
        post_json(
            "/api/devices/control",
            &json!({ "device_id": "attic_fan", "action": "on" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["message"], "I don't know a device called attic_fan.");
    assert_eq!(registry.to_file().await, before);
}

#[tokio::test]
async fn test_control_rejects_unknown_action() {
    let app = build_test_app(true).await;
    let (status, json) = send(
        &app.router,
        post_json(
            "/api/devices/control",
            &json!({ "device_id": "bedroom_light", "action": "explode" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_control_brightness_param_range() {
    let app = build_test_app(true).await;
    let (status, _) = send(
        &app.router,
        post_json(
            "/api/devices/control",
            &json!({ "device_id": "bedroom_light", "action": "set", "params": { "brightness": 140 } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &app.router,
        post_json(
            "/api/devices/control",
            &json!({ "device_id": "bedroom_light", "action": "set", "params": { "brightness": 40 } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["device"]["attributes"]["brightness"], 40);
}

#[tokio::test]
async fn test_devices_unavailable_without_home_control() {
    let app = build_test_app(false).await;
    let (status, json) = send(&app.router, get("/api/devices")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "not_configured");
}

#[tokio::test]
async fn test_chat_keeps_context_between_requests() {
    let app = build_test_app(false).await;

    let (status, first) = send(
        &app.router,
        post_json("/api/chat", &json!({ "text": "what's the weather" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["reply"], "It is sunny.");
    assert_eq!(first["fallback"], false);
    let context_id = first["context_id"].as_str().unwrap().to_string();

    let (_, second) = send(
        &app.router,
        post_json(
            "/api/chat",
            &json!({ "text": "and tomorrow?", "context_id": context_id }),
        ),
    )
    .await;
    assert_eq!(second["context_id"], context_id.as_str());

    assert_eq!(*app.generator.history_lens.lock().unwrap(), vec![0, 1]);
}

#[tokio::test]
async fn test_chat_routes_to_home_control() {
    let app = build_test_app(true).await;
    let (status, json) = send(
        &app.router,
        post_json(
            "/api/chat",
            &json!({ "text": "Capri, turn on the bedroom light", "speak": true }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["reply"], "Turning on the bedroom light.");
    assert_eq!(json["module"], "home_control");
    assert_eq!(json["result"]["effects"][0]["kind"], "device_status");
    assert_eq!(json["audio_mime"], "audio/wav");
    assert!(json["audio"].is_string());
    assert_eq!(app.generator.calls(), 0);
}

#[tokio::test]
async fn test_tts_returns_audio() {
    let app = build_test_app(false).await;
    let response = app
        .router
        .clone()
        .oneshot(post_json("/api/tts", &json!({ "text": "hello" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.starts_with(b"RIFF"));
}

#[tokio::test]
async fn test_tts_rejects_empty_text() {
    let app = build_test_app(false).await;
    let (status, json) = send(&app.router, post_json("/api/tts", &json!({ "text": "  " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");
}
