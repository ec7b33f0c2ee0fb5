#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde_json::Value;

use obico_guardian::{DetectionCoordinator, EntryConfig, InMemoryHost, UserInput};

pub const CAMERA: &str = "camera.printer";
pub const CAMERA_PICTURE: &str = "/api/camera_proxy/camera.printer?token=abc";

/// Bytes served as the camera picture (a JPEG header is enough for sniffing).
pub const SOURCE_IMAGE: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// Behaviour and recorded traffic of the fake Obico ML server.
pub struct FakeState {
    pub health_status: u16,
    pub image_status: u16,
    pub image: Vec<u8>,
    pub detect_status: u16,
    pub detect_body: String,
    pub detect_delay: Duration,
    pub detect_requests: Vec<Value>,
    pub health_hits: usize,
    pub image_hits: usize,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            health_status: 200,
            image_status: 200,
            image: SOURCE_IMAGE.to_vec(),
            detect_status: 200,
            detect_body: r#"{"detections": [], "inference_ms": 0, "provider": "onnx"}"#.to_string(),
            detect_delay: Duration::ZERO,
            detect_requests: Vec::new(),
            health_hits: 0,
            image_hits: 0,
        }
    }
}

type Shared = Arc<Mutex<FakeState>>;

/// In-process stand-in for both the camera proxy and the Obico ML API.
pub struct FakeObico {
    addr: SocketAddr,
    state: Shared,
}

impl FakeObico {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(FakeState::default()));
        let app = Router::new()
            .route("/hc", get(health))
            .route("/api/camera_proxy/{entity_id}", get(camera))
            .route("/detect", post(detect))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        let addr = listener.local_addr().expect("fake server address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake server runs");
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn detect_url(&self) -> String {
        format!("{}/detect", self.base_url())
    }

    pub fn set<F: FnOnce(&mut FakeState)>(&self, update: F) {
        update(&mut self.state.lock().expect("fake state lock"));
    }

    pub fn respond_with(&self, status: u16, body: &str) {
        self.set(|state| {
            state.detect_status = status;
            state.detect_body = body.to_string();
        });
    }

    pub fn detect_requests(&self) -> Vec<Value> {
        self.state.lock().expect("fake state lock").detect_requests.clone()
    }

    pub fn health_hits(&self) -> usize {
        self.state.lock().expect("fake state lock").health_hits
    }

    pub fn image_hits(&self) -> usize {
        self.state.lock().expect("fake state lock").image_hits
    }

    /// Host whose camera picture is served by this fake.
    pub fn host(&self) -> Arc<InMemoryHost> {
        let host = Arc::new(InMemoryHost::new(self.base_url()));
        host.set_camera(CAMERA, CAMERA_PICTURE);
        host
    }

    pub fn input(&self, camera_entity: &str, threshold: f64) -> UserInput {
        UserInput {
            url: self.detect_url(),
            interval_secs: 60,
            camera_entity: camera_entity.to_string(),
            threshold: Some(threshold),
        }
    }

    pub fn coordinator(&self, host: Arc<InMemoryHost>, threshold: f64) -> DetectionCoordinator {
        let config = EntryConfig::from_user_input(self.input(CAMERA, threshold)).expect("valid config");
        DetectionCoordinator::new("entry_test", &config, host).expect("client builds")
    }
}

async fn health(State(state): State<Shared>) -> StatusCode {
    let mut state = state.lock().expect("fake state lock");
    state.health_hits += 1;
    StatusCode::from_u16(state.health_status).expect("valid status")
}

async fn camera(State(state): State<Shared>) -> (StatusCode, Vec<u8>) {
    let mut state = state.lock().expect("fake state lock");
    state.image_hits += 1;
    (
        StatusCode::from_u16(state.image_status).expect("valid status"),
        state.image.clone(),
    )
}

async fn detect(State(state): State<Shared>, Json(payload): Json<Value>) -> impl IntoResponse {
    let (status, body, delay) = {
        let mut state = state.lock().expect("fake state lock");
        state.detect_requests.push(payload);
        (
            StatusCode::from_u16(state.detect_status).expect("valid status"),
            state.detect_body.clone(),
            state.detect_delay,
        )
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    (status, [(header::CONTENT_TYPE, "application/json")], body)
}
