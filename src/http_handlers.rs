// src/http_handlers.rs
use super::{types::HealthResponse, ServerState};
use axum::{extract::State, response::Json as AxumJson};

/// Liveness plus a rough load picture: registered connections and pool size.
pub async fn health_handler(State(state): State<ServerState>) -> AxumJson<HealthResponse> {
    AxumJson(HealthResponse {
        status: "ok",
        online: state.service.online(),
        seeking: state.service.seeking(),
    })
}
