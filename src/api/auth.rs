//! Static-key authentication
//!
//! Every endpoint except the liveness probe requires `X-API-Key`; mutating
//! admin endpoints additionally require `X-Admin-Key` when one is
//! configured. Comparisons are timing-safe.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::ApiState;
use crate::{Error, Result};

/// Middleware enforcing the API key on all routes but `/health`
pub async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let provided = header_value(request.headers(), "x-api-key");
    if provided.is_empty()
        || !constant_time_eq(provided.as_bytes(), state.config.api_key.as_bytes())
    {
        return Error::Auth("missing or invalid API key".to_string()).into_response();
    }

    next.run(request).await
}

/// Admin-key check for mutating admin endpoints
///
/// A no-op when no admin key is configured.
///
/// # Errors
///
/// Returns `Error::Auth` when the configured key is absent or wrong
pub fn require_admin(state: &ApiState, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = &state.config.admin_key else {
        return Ok(());
    };

    let provided = header_value(headers, "x-admin-key");
    if provided.is_empty() || !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return Err(Error::Auth("admin key required".to_string()));
    }

    Ok(())
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(!constant_time_eq(b"", b"x"));
    }
}
