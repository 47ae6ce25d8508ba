// src/lib.rs
pub mod chat_index;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http_handlers;
pub mod matcher;
pub mod presence;
pub mod relay;
pub mod room_manager;
pub mod service;
pub mod socket_handlers;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

use anyhow::Context;
use axum::{routing::get, Router};
use config::Config;
use http::HeaderValue;
use service::ChatService;
use socketioxide::{extract::SocketRef, layer::SocketIoLayer, SocketIo};
use std::sync::Arc;
use store::SqliteGateway;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
pub struct ServerState {
    pub service: Arc<ChatService>,
    pub config: Arc<Config>,
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tagmatch=info,tower_http=info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Opens the durable store and builds the in-memory service on top of it.
/// Failing here is fatal: nothing can run without storage.
pub async fn setup_shared_state(config: Arc<Config>) -> anyhow::Result<ServerState> {
    let gateway = SqliteGateway::connect(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database_url))?;
    info!("🗃️ [DB] Connected to {}", config.database_url);

    let service = Arc::new(ChatService::new(Arc::new(gateway), &config));
    Ok(ServerState { service, config })
}

/// Hooks the Socket.IO namespace up to the service.
pub fn attach_socket_handlers(io: &SocketIo, state: ServerState) {
    io.ns("/", move |s: SocketRef| {
        let state = state.clone();
        async move {
            socket_handlers::on_socket_connect(s, state).await;
        }
    });
}

pub fn build_router(state: ServerState, layer: SocketIoLayer) -> anyhow::Result<Router> {
    let cors = if state.config.cors_origin == "*" {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origin = state
            .config
            .cors_origin
            .parse::<HeaderValue>()
            .with_context(|| format!("Invalid CORS origin {}", state.config.cors_origin))?;
        CorsLayer::new().allow_origin(origin)
    };

    Ok(Router::new()
        .route("/health", get(http_handlers::health_handler))
        .with_state(state)
        .layer(cors.allow_methods(Any).allow_headers(Any))
        .layer(layer))
}
