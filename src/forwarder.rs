//! HTTP fan-out to target `/listen` endpoints
//!
//! A failed delivery never fails the routing decision; the outcome is
//! reported back so the decision can carry `target_error:<kind>`.

use serde::Serialize;
use uuid::Uuid;

use crate::{Error, Result};

/// Connect timeout per attempt
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Payload delivered to `{base_url}/listen`
#[derive(Debug, Clone, Serialize)]
pub struct ForwardPayload {
    pub event_id: String,
    pub source_id: String,
    pub room: Option<String>,
    /// Unix milliseconds
    pub ts: i64,
    pub text: String,
    pub confidence: Option<f32>,
    pub session_id: String,
    pub target: String,
    pub reason: String,
}

/// Result of a delivery attempt sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// A 2xx response was received
    Delivered,
    /// Both attempts failed; the kind feeds `target_error:<kind>`
    Failed(String),
}

/// Generate a forwarded-event id
#[must_use]
pub fn make_event_id() -> String {
    format!("en-{}", &Uuid::new_v4().simple().to_string()[..12])
}

/// Delivers routed events to targets
pub struct TargetForwarder {
    client: reqwest::Client,
}

impl TargetForwarder {
    /// Build the forwarder with its timeout policy
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(total_timeout_s: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(std::time::Duration::from_secs(total_timeout_s))
            .build()
            .map_err(Error::Http)?;

        Ok(Self { client })
    }

    /// Post the payload, retrying once on transient failure or 5xx
    ///
    /// 4xx responses are not retried: the request is wrong, not the network.
    pub async fn forward(&self, listen_url: &str, payload: &ForwardPayload) -> ForwardOutcome {
        let mut last_kind = String::new();

        for attempt in 0..2 {
            match self.client.post(listen_url).json(payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if attempt > 0 {
                            tracing::debug!(url = listen_url, "forward succeeded on retry");
                        }
                        return ForwardOutcome::Delivered;
                    }

                    let body = response.text().await.unwrap_or_default();
                    tracing::warn!(
                        url = listen_url,
                        status = %status,
                        body = %body,
                        attempt,
                        "target rejected forward"
                    );

                    if status.is_client_error() {
                        return ForwardOutcome::Failed(format!("status_{}", status.as_u16()));
                    }
                    last_kind = format!("status_{}", status.as_u16());
                }
                Err(e) => {
                    let kind = classify(&e);
                    tracing::warn!(
                        url = listen_url,
                        error = %e,
                        kind,
                        attempt,
                        "forward attempt failed"
                    );
                    last_kind = kind.to_string();
                }
            }
        }

        ForwardOutcome::Failed(last_kind)
    }
}

/// Short failure label for decision reasons
fn classify(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_request() {
        "request"
    } else {
        "network"
    }
}
