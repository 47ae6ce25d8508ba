// src/main.rs
use anyhow::Context;
use socketioxide::SocketIo;
use std::sync::Arc;
use tagmatch::{attach_socket_handlers, build_router, config::Config, init_tracing, setup_shared_state};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("🚀 Starting tagmatch");

    let config = Arc::new(Config::from_env());
    let (layer, io) = SocketIo::builder()
        .max_buffer_size(config.max_buffer_size)
        .build_layer();

    let server_state = setup_shared_state(config.clone()).await?;
    attach_socket_handlers(&io, server_state.clone());
    let app = build_router(server_state, layer)?;

    info!("🚀 Rust server is running at http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
