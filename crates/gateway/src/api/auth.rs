//! API authentication middleware.
//!
//! Reads the env var named by `config.server.api_token_env` (default
//! `PK_API_TOKEN`) once at startup and caches its SHA-256 digest in
//! `AppState`. With a token configured, every protected request must carry
//! `Authorization: Bearer <token>`; without one, the API is open (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub fn token_hash(token: &str) -> Option<Vec<u8>> {
    let token = token.trim();
    (!token.is_empty()).then(|| Sha256::digest(token.as_bytes()).to_vec())
}

/// Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_token_hash else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Compare fixed-length digests so the token length does not leak.
    let provided = Sha256::digest(provided.as_bytes());
    if !bool::from(provided.ct_eq(expected.as_slice())) {
        return super::error(StatusCode::UNAUTHORIZED, "invalid or missing API token");
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_token_means_dev_mode() {
        assert!(token_hash("").is_none());
        assert!(token_hash("  \n").is_none());
    }

    #[test]
    fn token_is_trimmed_before_hashing() {
        assert_eq!(token_hash("secret\n"), token_hash("secret"));
        assert_eq!(token_hash("secret").map(|h| h.len()), Some(32));
    }
}
