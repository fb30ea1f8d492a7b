//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use capri_voice::config::{HomeConfig, UtteranceConfig, WakeConfig};
use capri_voice::conversation::ConversationContext;
use capri_voice::llm::ResponseGenerator;
use capri_voice::modules::home_control::{DeviceRegistry, RegistryFile};
use capri_voice::modules::{HomeControlModule, ModuleRegistry, ModuleResult};
use capri_voice::pipeline::Orchestrator;
use capri_voice::voice::{AudioFrame, AudioSink, Speaker, Transcriber, Utterance};
use capri_voice::{Error, Result};

/// Samples per frame used throughout the tests (80 ms at 16 kHz)
pub const FRAME_SAMPLES: usize = 1280;
pub const RATE: u32 = 16_000;

/// A frame of constant amplitude
pub fn frame(seq: u64, level: f32) -> AudioFrame {
    AudioFrame::new(
        seq,
        RATE,
        Duration::from_millis(seq * 80),
        vec![level; FRAME_SAMPLES],
    )
}

/// `count` frames starting at `start`
pub fn frames(start: u64, count: u64, level: f32) -> Vec<AudioFrame> {
    (start..start + count).map(|seq| frame(seq, level)).collect()
}

/// Wake gate settings: two-frame window evaluated on every frame
pub fn wake_config() -> WakeConfig {
    WakeConfig {
        word: "capri".to_string(),
        threshold: 0.5,
        window_frames: 2,
        stride_frames: 1,
        cooldown: Duration::from_millis(2000),
    }
}

pub fn utterance_config() -> UtteranceConfig {
    UtteranceConfig {
        silence_threshold: 0.01,
        silence_frames: 3,
        max_duration: Duration::from_secs(5),
        min_frames: 4,
    }
}

pub fn home_config(path: PathBuf) -> HomeConfig {
    HomeConfig {
        enabled: true,
        registry_path: path,
        http_timeout: Duration::from_millis(500),
        mqtt_timeout: Duration::from_millis(500),
        optimistic_ttl: Duration::from_secs(30),
    }
}

/// One scripted transcription: optional delay, then text or an STT error
pub type Step = (Option<Duration>, std::result::Result<String, String>);

/// Transcriber that plays back a script, one step per call
///
/// The last step repeats once the script runs out.
pub struct ScriptedTranscriber {
    script: Mutex<VecDeque<Step>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers `text` immediately
    pub fn saying(text: &str) -> Self {
        Self::new(vec![(None, Ok(text.to_string()))])
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _utterance: &Utterance) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, result) = {
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or((None, Ok(String::new())))
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result.map_err(Error::Stt)
    }
}

/// Speaker that records what it was asked to say
#[derive(Default)]
pub struct RecordingSpeaker {
    pub spoken: Mutex<Vec<String>>,
    /// Texts that fail to synthesize
    pub fail_on: Mutex<Vec<String>>,
}

impl RecordingSpeaker {
    /// Speaker that errors on each of `texts`
    pub fn failing_on(texts: &[&str]) -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            fail_on: Mutex::new(texts.iter().map(|t| (*t).to_string()).collect()),
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.spoken.lock().unwrap().push(text.to_string());
        if self.fail_on.lock().unwrap().iter().any(|t| t == text) {
            return Err(Error::Tts("voice unavailable".to_string()));
        }
        Ok(b"RIFF\0\0\0\0WAVEfmt ".to_vec())
    }
}

/// Generator with a fixed reply that records the history it saw
pub struct CannedGenerator {
    reply: String,
    pub history_lens: Mutex<Vec<usize>>,
    pub grounding: Mutex<Vec<Option<String>>>,
}

impl CannedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            history_lens: Mutex::new(Vec::new()),
            grounding: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.history_lens.lock().unwrap().len()
    }
}

#[async_trait]
impl ResponseGenerator for CannedGenerator {
    async fn generate(
        &self,
        context: &ConversationContext,
        _prompt: &str,
        module: Option<&ModuleResult>,
    ) -> Result<String> {
        self.history_lens.lock().unwrap().push(context.len());
        self.grounding
            .lock()
            .unwrap()
            .push(module.map(|m| m.text.clone()));
        Ok(self.reply.clone())
    }
}

/// Sink that counts playbacks without touching audio hardware
#[derive(Default)]
pub struct CountingSink {
    pub plays: AtomicUsize,
}

#[async_trait]
impl AudioSink for CountingSink {
    async fn play(&self, _audio: &[u8]) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A command as received by the fake device server
#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    pub device: String,
    pub body: Value,
}

/// Fake HTTP device endpoint
#[derive(Default)]
pub struct DeviceServer {
    pub received: Mutex<Vec<Received>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    /// Delay before answering each command
    pub delay: Mutex<Option<Duration>>,
    /// Status code to answer commands with
    pub fail_with: Mutex<Option<StatusCode>>,
    /// Plain-text body to answer successful commands with instead of JSON
    pub reply_body: Mutex<Option<String>>,
}

impl DeviceServer {
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

async fn device_command(
    State(server): State<Arc<DeviceServer>>,
    Path(device): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let now = server.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    server.max_in_flight.fetch_max(now, Ordering::SeqCst);

    let delay = *server.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    server.received.lock().unwrap().push(Received {
        method: "PUT".to_string(),
        device,
        body: body.clone(),
    });
    server.in_flight.fetch_sub(1, Ordering::SeqCst);

    let fail_with = *server.fail_with.lock().unwrap();
    if let Some(status) = fail_with {
        return (status, Json(json!({ "error": "device fault" }))).into_response();
    }

    let reply_body = server.reply_body.lock().unwrap().clone();
    if let Some(text) = reply_body {
        return (StatusCode::OK, text).into_response();
    }

    let status = match body["action"].as_str() {
        Some("off") => "off",
        _ => "on",
    };
    (StatusCode::OK, Json(json!({ "status": status }))).into_response()
}

async fn device_state(Path(_device): Path<String>) -> Json<Value> {
    Json(json!({ "status": "off" }))
}

/// Start a device server on an ephemeral port
pub async fn spawn_device_server() -> (SocketAddr, Arc<DeviceServer>) {
    let server = Arc::new(DeviceServer::default());
    let app = Router::new()
        .route("/devices/{device}", put(device_command).get(device_state))
        .with_state(Arc::clone(&server));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, server)
}

/// Registry document with a bedroom light at `addr` and a thermostat
pub fn registry_json(addr: SocketAddr) -> Value {
    json!({
        "devices": {
            "bedroom_light": {
                "name": "Bedroom Light",
                "type": "light",
                "protocol": "http",
                "url": format!("http://{addr}/devices/bedroom_light"),
                "room": "bedroom"
            },
            "hall_thermostat": {
                "name": "Hall Thermostat",
                "type": "thermostat",
                "protocol": "http",
                "url": format!("http://{addr}/devices/hall_thermostat"),
                "status": "on"
            }
        },
        "version": 3
    })
}

/// A message received by the fake broker
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub qos: u8,
    pub payload: Value,
}

/// Minimal MQTT 3.1.1 broker
///
/// Accepts every connection, acknowledges QoS 1 publishes and answers each
/// subscription with `retained` when one is set.
#[derive(Default)]
pub struct FakeBroker {
    pub published: Mutex<Vec<Published>>,
    pub retained: Mutex<Option<String>>,
}

impl FakeBroker {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }
}

/// Start a fake broker on an ephemeral port
pub async fn spawn_mqtt_broker() -> (SocketAddr, Arc<FakeBroker>) {
    let broker = Arc::new(FakeBroker::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shared = Arc::clone(&broker);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_mqtt(stream, Arc::clone(&shared)));
        }
    });
    (addr, broker)
}

/// Port on localhost with nothing listening
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut len = 0_usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        len |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; len];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

async fn serve_mqtt(mut stream: TcpStream, broker: Arc<FakeBroker>) {
    while let Some((header, body)) = read_packet(&mut stream).await {
        let reply = match header >> 4 {
            // CONNECT
            1 => vec![0x20, 0x02, 0x00, 0x00],
            // PUBLISH
            3 => {
                let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
                let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).to_string();
                let qos = (header >> 1) & 0x03;
                let mut rest = &body[2 + topic_len..];
                let mut ack = Vec::new();
                if qos > 0 {
                    ack = vec![0x40, 0x02, rest[0], rest[1]];
                    rest = &rest[2..];
                }
                broker.published.lock().unwrap().push(Published {
                    topic,
                    qos,
                    payload: serde_json::from_slice(rest).unwrap_or(Value::Null),
                });
                ack
            }
            // SUBSCRIBE
            8 => {
                let topic_len = usize::from(u16::from_be_bytes([body[2], body[3]]));
                let topic = body[4..4 + topic_len].to_vec();
                let mut out = vec![0x90, 0x03, body[0], body[1], 0x01];
                let retained = broker.retained.lock().unwrap().clone();
                if let Some(state) = retained {
                    let len = 2 + topic.len() + state.len();
                    out.push(0x31);
                    out.push(u8::try_from(len).unwrap());
                    out.extend(u16::try_from(topic.len()).unwrap().to_be_bytes());
                    out.extend(&topic);
                    out.extend(state.as_bytes());
                }
                out
            }
            // PINGREQ
            12 => vec![0xd0, 0x00],
            // DISCONNECT
            14 => break,
            _ => Vec::new(),
        };
        if !reply.is_empty() && stream.write_all(&reply).await.is_err() {
            break;
        }
    }
}

/// Registry document with MQTT devices behind the broker at `addr`
pub fn mqtt_registry_json(addr: SocketAddr) -> Value {
    json!({
        "devices": {
            "porch_light": {
                "name": "Porch Light",
                "type": "light",
                "protocol": "mqtt",
                "mqtt": {
                    "host": addr.ip().to_string(),
                    "port": addr.port(),
                    "topic": "home/porch/light/set"
                }
            },
            "garage_fan": {
                "name": "Garage Fan",
                "type": "fan",
                "protocol": "mqtt",
                "status": "on",
                "mqtt": {
                    "host": addr.ip().to_string(),
                    "port": addr.port(),
                    "state_topic": "home/garage/fan/state"
                }
            }
        }
    })
}

/// Home control over an in-memory registry built from `json`
pub fn home_module_with(json: &Value, config: &HomeConfig) -> (Arc<DeviceRegistry>, Arc<HomeControlModule>) {
    let file = RegistryFile::from_json(&json.to_string()).unwrap();
    let registry = Arc::new(DeviceRegistry::in_memory(file));
    let module = Arc::new(HomeControlModule::new(Arc::clone(&registry), config).unwrap());
    (registry, module)
}

/// Home control over an in-memory registry
pub fn home_module(addr: SocketAddr) -> (Arc<DeviceRegistry>, Arc<HomeControlModule>) {
    let file = RegistryFile::from_json(&registry_json(addr).to_string()).unwrap();
    let registry = Arc::new(DeviceRegistry::in_memory(file));
    let module = Arc::new(
        HomeControlModule::new(Arc::clone(&registry), &home_config(PathBuf::from("unused.json")))
            .unwrap(),
    );
    (registry, module)
}

/// Orchestrator with home control and the given adapters
pub fn orchestrator(
    home: Option<Arc<HomeControlModule>>,
    generator: Arc<CannedGenerator>,
    transcriber: Arc<ScriptedTranscriber>,
    speaker: Arc<RecordingSpeaker>,
) -> Orchestrator {
    let mut modules = ModuleRegistry::new();
    if let Some(home) = home {
        modules.register(home).unwrap();
    }
    Orchestrator::new(Arc::new(modules), generator, transcriber, speaker)
}
