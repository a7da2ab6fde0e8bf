//! `GET /v1/connections`: link state and queue depth per app.

use axum::extract::{Json, State};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::connections::ConnectionInfo;
use crate::runtime::QueueDepth;
use crate::state::AppState;

#[derive(Serialize)]
struct ConnectionRow {
    #[serde(flatten)]
    info: ConnectionInfo,
    pending: QueueDepth,
}

pub async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    let connections: Vec<ConnectionRow> = state
        .registry
        .list()
        .into_iter()
        .map(|info| ConnectionRow {
            pending: state.coordinator.pending(&info.app),
            info,
        })
        .collect();

    Json(serde_json::json!({
        "connections": connections,
        "last_identity": state.identity.last(),
        "bad_tokens": state.bad_tokens.len(),
        "shutting_down": state.coordinator.is_shutting_down(),
    }))
}
