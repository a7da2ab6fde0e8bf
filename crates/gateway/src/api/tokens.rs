//! `POST /v1/tokens/recover`: clear a token previously reported as bad.

use std::str::FromStr;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pk_domain::notification::normalize_token;
use pk_domain::AppKey;
use serde::Deserialize;

use super::error;
use super::push::route_token;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub app: String,
    #[serde(default)]
    pub sandbox: bool,
    pub token: String,
}

pub async fn recover(State(state): State<AppState>, Json(req): Json<RecoverRequest>) -> Response {
    let app = match AppKey::from_str(req.app.trim()) {
        Ok(app) if req.sandbox => app.with_sandbox(true),
        Ok(app) => app,
        Err(e) => return error(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let (app, token) = route_token(&app, &req.token);
    let token = normalize_token(token);
    if token.is_empty() {
        return error(StatusCode::BAD_REQUEST, "missing device token");
    }

    match state.bad_tokens.recover(&app, &token) {
        Ok(recovered) => {
            if recovered {
                tracing::info!(app = %app, token = %token, "bad token recovered");
            }
            Json(serde_json::json!({ "app": app, "token": token, "recovered": recovered }))
                .into_response()
        }
        Err(e) => {
            tracing::error!(app = %app, error = %e, "bad token recovery failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, "bad token store unavailable")
        }
    }
}
