//! API authentication middleware.
//!
//! `NEXTAI_API_KEY` is read once at startup and cached as a SHA-256
//! digest. Requests present the key as `Authorization: Bearer <key>` or
//! `X-Api-Key: <key>`; comparison is constant-time over the digests.
//! Without a key the server refuses every protected request unless the
//! insecure bypass (`NEXTAI_ALLOW_INSECURE_NO_API_KEY`) was explicitly
//! enabled.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::{AppState, AuthMode};

/// Compute the startup auth mode from the configuration.
pub fn auth_mode(api_key: &str, allow_insecure: bool) -> AuthMode {
    if !api_key.is_empty() {
        AuthMode::Required(Sha256::digest(api_key.as_bytes()).to_vec())
    } else if allow_insecure {
        AuthMode::Disabled
    } else {
        AuthMode::Locked
    }
}

fn unauthorized(message: &str) -> Response {
    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({
            "error": { "code": "unauthorized", "message": message }
        })),
    )
        .into_response()
}

/// Extract the presented key from `Authorization: Bearer` or `X-Api-Key`.
fn presented_key(req: &Request<Body>) -> Option<&str> {
    if let Some(bearer) = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer);
    }
    req.headers().get("x-api-key").and_then(|v| v.to_str().ok())
}

/// Axum middleware enforcing the API key on protected routes.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected = match &state.auth {
        AuthMode::Disabled => return next.run(req).await,
        AuthMode::Locked => {
            return unauthorized(
                "no API key is configured; set NEXTAI_API_KEY or explicitly \
                 enable NEXTAI_ALLOW_INSECURE_NO_API_KEY",
            );
        }
        AuthMode::Required(hash) => hash,
    };

    let provided = presented_key(&req).unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected.as_slice())) {
        return unauthorized("invalid or missing API key");
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_required_with_key() {
        assert!(matches!(auth_mode("secret", false), AuthMode::Required(_)));
        assert!(matches!(auth_mode("secret", true), AuthMode::Required(_)));
    }

    #[test]
    fn mode_disabled_needs_explicit_bypass() {
        assert!(matches!(auth_mode("", true), AuthMode::Disabled));
        assert!(matches!(auth_mode("", false), AuthMode::Locked));
    }

    #[test]
    fn presented_key_prefers_bearer() {
        let req = Request::builder()
            .header("authorization", "Bearer abc")
            .header("x-api-key", "def")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_key(&req), Some("abc"));
    }

    #[test]
    fn presented_key_falls_back_to_header() {
        let req = Request::builder()
            .header("x-api-key", "def")
            .body(Body::empty())
            .unwrap();
        assert_eq!(presented_key(&req), Some("def"));
    }
}
