//! HTTP API server
//!
//! Request handlers run on the tokio runtime and talk to the worker only
//! through the shared state manager and registry, keeping the audio
//! pipeline isolated from request latency.

mod audio;
mod auth;
mod health;
mod sessions;
mod state;
mod targets;
mod text;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{middleware, Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::registry::Registry;
use crate::state::StateManager;
use crate::transcribe::Transcriber;
use crate::{Error, Result};

/// Shared state for API handlers
pub struct ApiState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub state: Arc<StateManager>,
    pub router: Arc<crate::router::Router>,
    pub transcriber: Arc<dyn Transcriber>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidMode(_) | Self::Config(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        (
            status,
            Json(serde_json::json!({ "ok": false, "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Assemble the full route table with auth, CORS, and tracing layers
pub fn build_router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router(state.clone()))
        .merge(targets::router(state.clone()))
        .merge(state::router(state.clone()))
        .merge(text::router(state.clone()))
        .merge(audio::router(state.clone()))
        .merge(sessions::router(state.clone()))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_api_key,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: Arc<ApiState>, host: String, port: u16) -> Self {
        Self { state, host, port }
    }

    /// Bind and serve until the task is dropped
    ///
    /// # Errors
    ///
    /// Returns error if the listener fails to bind or serve
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server on {addr}: {e}")))?;

        tracing::info!(addr = %addr, "api server listening");

        axum::serve(listener, build_router(self.state))
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
