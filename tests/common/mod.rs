//! Shared test utilities

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use echonet::api::{build_router, ApiState};
use echonet::config::{AudioConfig, Config, DiscoveryConfig, WhisperConfig};
use echonet::db::{self, SettingsStore};
use echonet::forwarder::TargetForwarder;
use echonet::registry::Registry;
use echonet::router::RouterConfig;
use echonet::state::{ListenMode, StateManager};
use echonet::transcribe::StubTranscriber;

/// API key used by the test config
pub const API_KEY: &str = "test-api-key";

/// Admin key used by the test config
pub const ADMIN_KEY: &str = "test-admin-key";

/// A service config suitable for tests (no env reads)
#[must_use]
pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        db_path: ":memory:".to_string(),
        api_key: API_KEY.to_string(),
        admin_key: Some(ADMIN_KEY.to_string()),
        source_id: "m1".to_string(),
        room: Some("office".to_string()),
        session_ttl_seconds: 25,
        cancel_phrases: vec![
            "cancel".to_string(),
            "never mind".to_string(),
            "nevermind".to_string(),
            "stop listening".to_string(),
        ],
        forward_strip_trigger: true,
        http_timeout_s: 2,
        initial_listen_mode: ListenMode::Trigger,
        audio: AudioConfig::default(),
        whisper: WhisperConfig {
            model: "whisper-1".to_string(),
            device: "cpu".to_string(),
            compute_type: "int8".to_string(),
            language: "auto".to_string(),
            api_url: "http://127.0.0.1:9/unused".to_string(),
            api_key: None,
        },
        discovery: DiscoveryConfig {
            enabled: false,
            instance_name: "test".to_string(),
            zone: String::new(),
            subzone: String::new(),
        },
    }
}

/// Assembled application pieces backed by one in-memory database
pub struct TestApp {
    pub api: Router,
    pub registry: Arc<Registry>,
    pub state: Arc<StateManager>,
    pub router: Arc<echonet::Router>,
}

/// Build the full API router over an in-memory database
#[must_use]
pub fn build_test_app(transcript: &str) -> TestApp {
    let config = Arc::new(test_config());
    let pool = db::init_memory().expect("failed to init test db");

    let registry = Arc::new(Registry::new(pool.clone()).expect("failed to build registry"));
    let state = Arc::new(StateManager::new(Arc::new(SettingsStore::new(pool))));
    let router = Arc::new(echonet::Router::new(
        Arc::clone(&registry),
        TargetForwarder::new(config.http_timeout_s).expect("failed to build forwarder"),
        RouterConfig {
            cancel_phrases: config.cancel_phrases.clone(),
            session_ttl_seconds: config.session_ttl_seconds,
            strip_trigger: config.forward_strip_trigger,
        },
    ));

    let api_state = Arc::new(ApiState {
        config,
        registry: Arc::clone(&registry),
        state: Arc::clone(&state),
        router: Arc::clone(&router),
        transcriber: Arc::new(StubTranscriber::with_text(transcript)),
    });

    TestApp {
        api: build_router(api_state),
        registry,
        state,
        router,
    }
}

/// Received bodies of a mock target, in arrival order
pub type ReceivedEvents = Arc<Mutex<Vec<Value>>>;

async fn record_listen(
    State(received): State<ReceivedEvents>,
    Json(body): Json<Value>,
) -> Json<Value> {
    received.lock().expect("received lock").push(body);
    Json(json!({ "ok": true }))
}

/// Spawn a target stub that records every POST /listen body
///
/// Returns its base URL and the shared record of received events.
pub async fn spawn_mock_target() -> (String, ReceivedEvents) {
    let received: ReceivedEvents = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route("/listen", post(record_listen))
        .with_state(Arc::clone(&received));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock target");
    let addr = listener.local_addr().expect("mock target addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), received)
}
