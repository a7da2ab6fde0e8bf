//! `POST /v1/push`: admission of new notifications.
//!
//! Admission errors (unknown app, missing token, unusable payload) are
//! answered synchronously; everything accepted is handed to the coordinator
//! and delivered asynchronously.

use std::str::FromStr;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pk_domain::{AppKey, Notification, Payload};
use serde::Deserialize;

use super::error;
use crate::state::AppState;

/// Token prefix that routes a single token to the sandbox variant of the app.
pub const SANDBOX_TOKEN_PREFIX: &str = "sb:";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Tokens {
    One(String),
    Many(Vec<String>),
}

impl Tokens {
    fn into_vec(self) -> Vec<String> {
        match self {
            Tokens::One(token) => vec![token],
            Tokens::Many(tokens) => tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub app: String,
    #[serde(default)]
    pub sandbox: bool,
    pub token: Tokens,
    pub payload: serde_json::Value,
}

/// Resolve the app a token is bound for: an `sb:` prefix selects sandbox.
pub fn route_token<'a>(app: &AppKey, token: &'a str) -> (AppKey, &'a str) {
    match token.strip_prefix(SANDBOX_TOKEN_PREFIX) {
        Some(rest) => (app.with_sandbox(true), rest),
        None => (app.clone(), token),
    }
}

pub async fn push(State(state): State<AppState>, Json(req): Json<PushRequest>) -> Response {
    if state.coordinator.is_shutting_down() {
        return error(StatusCode::SERVICE_UNAVAILABLE, "shutting down");
    }

    let app = match AppKey::from_str(req.app.trim()) {
        Ok(app) if req.sandbox => app.with_sandbox(true),
        Ok(app) => app,
        Err(e) => return error(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let payload = match Payload::from_value(req.payload) {
        Ok(payload) => payload,
        Err(e) => return error(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let tokens = req.token.into_vec();
    if tokens.is_empty() {
        return error(StatusCode::BAD_REQUEST, "missing device token");
    }

    // Validate the whole batch before anything is queued.
    let mut batch = Vec::with_capacity(tokens.len());
    for raw in &tokens {
        let (target, token) = route_token(&app, raw);
        if !state.credentials.has(&target) {
            return error(StatusCode::NOT_FOUND, &format!("unknown app: {target}"));
        }
        match Notification::new(target, token, payload.clone()) {
            Ok(notification) => batch.push(notification),
            Err(e) => return error(StatusCode::BAD_REQUEST, &e.to_string()),
        }
    }

    let mut accepted = 0usize;
    for notification in batch {
        if let Err(e) = state.coordinator.submit(notification).await {
            tracing::error!(error = %e, accepted, "submission failed mid-batch");
            return error(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
        }
        accepted += 1;
    }
    tracing::debug!(app = %app, accepted, "push accepted");

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": accepted })),
    )
        .into_response()
}
