pub mod auth;
pub mod connections;
pub mod push;
pub mod tokens;

use axum::extract::{DefaultBodyLimit, Json, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health));

    let protected = Router::new()
        .route("/v1/push", post(push::push))
        .route("/v1/tokens/recover", post(tokens::recover))
        .route("/v1/connections", get(connections::list_connections))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
}

// GET /v1/health: public health check
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": if state.coordinator.is_shutting_down() { "draining" } else { "ok" },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(crate) fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
