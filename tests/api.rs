//! API endpoint integration tests: auth, registration, state changes

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

mod common;
use common::{build_test_app, ADMIN_KEY, API_KEY};

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value, admin: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", API_KEY)
        .header("content-type", "application/json");
    if admin {
        builder = builder.header("x-admin-key", ADMIN_KEY);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let app = build_test_app("unused");

    let response = app
        .api
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "echonet");
}

#[tokio::test]
async fn test_missing_api_key_rejected() {
    let app = build_test_app("unused");

    let response = app
        .api
        .oneshot(Request::builder().uri("/targets").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_api_key_rejected() {
    let app = build_test_app("unused");

    let response = app
        .api
        .oneshot(
            Request::builder()
                .uri("/targets")
                .header("x-api-key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_requires_admin_key() {
    let app = build_test_app("unused");
    let body = serde_json::json!({
        "name": "astraea",
        "base_url": "http://astraea.local:9001",
        "phrases": ["hey astraea"],
    });

    let response = app
        .api
        .clone()
        .oneshot(json_request("POST", "/register", body.clone(), false))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .api
        .oneshot(json_request("POST", "/register", body, true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["registered"], "astraea");
    assert_eq!(json["listen_url"], "http://astraea.local:9001/listen");
}

#[tokio::test]
async fn test_register_validates_input() {
    let app = build_test_app("unused");

    let bad_url = serde_json::json!({
        "name": "x",
        "base_url": "not a url",
        "phrases": ["hey"],
    });
    let response = app
        .api
        .clone()
        .oneshot(json_request("POST", "/register", bad_url, true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let no_phrases = serde_json::json!({
        "name": "x",
        "base_url": "http://h:1",
        "phrases": [],
    });
    let response = app
        .api
        .oneshot(json_request("POST", "/register", no_phrases, true))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_target_list_and_delete() {
    let app = build_test_app("unused");
    app.registry
        .upsert("astraea", "http://h:1", &["hey astraea".to_string()])
        .unwrap();

    let response = app.api.clone().oneshot(get("/targets")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["targets"].as_array().unwrap().len(), 1);

    // Delete without admin key is rejected
    let response = app
        .api
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/targets/astraea")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .api
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/targets/astraea")
                .header("x-api-key", API_KEY)
                .header("x-admin-key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Gone now
    let response = app
        .api
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/targets/astraea")
                .header("x-api-key", API_KEY)
                .header("x-admin-key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_state_validates_target_and_mode() {
    let app = build_test_app("unused");
    app.registry
        .upsert("astraea", "http://h:1", &["hey astraea".to_string()])
        .unwrap();

    // Unknown target
    let response = app
        .api
        .clone()
        .oneshot(json_request(
            "PUT",
            "/state",
            serde_json::json!({"target": "ghost", "source": "api", "state": "active"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Invalid mode
    let response = app
        .api
        .clone()
        .oneshot(json_request(
            "PUT",
            "/state",
            serde_json::json!({"target": "astraea", "source": "api", "state": "loud"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Valid change is observable immediately
    let response = app
        .api
        .clone()
        .oneshot(json_request(
            "PUT",
            "/state",
            serde_json::json!({"target": "astraea", "source": "api", "state": "active"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.state.listen_mode().unwrap(),
        echonet::ListenMode::Active
    );

    let response = app.api.clone().oneshot(get("/state")).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["listen_mode"], "active");

    // And audited with the requesting target in the source
    let response = app
        .api
        .oneshot(get("/state/history?name=listen_mode&limit=5"))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["changes"][0]["new_value"], "active");
    assert_eq!(json["changes"][0]["source"], "api:astraea");
}

#[tokio::test]
async fn test_config_endpoints() {
    let app = build_test_app("unused");

    let response = app.api.clone().oneshot(get("/config")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["config"]["enable_preroll_buffer"]["value"], "false");
    assert_eq!(json["config"]["preroll_buffer_seconds"]["value"], "2.0");

    let response = app
        .api
        .clone()
        .oneshot(json_request(
            "PUT",
            "/config/enable_preroll_buffer",
            serde_json::json!({"value": "true"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.state.preroll_enabled().unwrap());

    // Type validation
    let response = app
        .api
        .clone()
        .oneshot(json_request(
            "PUT",
            "/config/preroll_buffer_seconds",
            serde_json::json!({"value": "99"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Unknown key
    let response = app
        .api
        .oneshot(json_request(
            "PUT",
            "/config/bogus",
            serde_json::json!({"value": "1"}),
            true,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_text_rejects_empty() {
    let app = build_test_app("unused");

    let response = app
        .api
        .oneshot(json_request(
            "POST",
            "/text",
            serde_json::json!({"source_id": "m1", "ts": 100_000, "text": "   "}),
            false,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_handshake_reports_capabilities() {
    let app = build_test_app("unused");

    let response = app.api.oneshot(get("/handshake")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["capabilities"]["asr"], true);
    assert_eq!(json["capabilities"]["target_routing"], true);
    assert_eq!(json["config"]["session_ttl_seconds"], 25);
}

#[tokio::test]
async fn test_transcribe_endpoint_with_multipart_wav() {
    let app = build_test_app("hey astraea whats up");

    // 0.1s of a quiet tone, encoded as 16-bit WAV
    let samples: Vec<f32> = (0..1600).map(|i| (i as f32 * 0.05).sin() * 0.1).collect();
    let wav = echonet::audio::samples_to_wav(&samples, 16_000).unwrap();

    let boundary = "test-boundary-7f3a";
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"a.wav\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
    body.extend_from_slice(&wav);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let response = app
        .api
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/test/transcribe")
                .header("x-api-key", API_KEY)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["text"], "hey astraea whats up");
    assert!(json["duration_s"].as_f64().unwrap() > 0.09);
    assert!(json["decision"].is_null());
}
