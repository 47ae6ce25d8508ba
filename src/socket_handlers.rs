// src/socket_handlers.rs
use super::{
    presence::ClientSink,
    types::{ConnectPayload, QueuePayload, RoomId, RoomPayload, SendMessagePayload, ServerEvent},
    ServerState,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use socketioxide::extract::{Data, SocketRef};
use std::sync::Arc;
use tracing::{info, warn};

/// Emits service events on the underlying Socket.IO socket. Room groups are
/// Socket.IO rooms, so a disconnect drops them without any bookkeeping here.
struct SocketSink(SocketRef);

fn room_channel(room_id: RoomId) -> String {
    format!("room:{}", room_id)
}

#[async_trait]
impl ClientSink for SocketSink {
    fn deliver(&self, event: &ServerEvent) -> bool {
        self.0.emit(event.name(), event).is_ok()
    }

    fn join_room(&self, room_id: RoomId) {
        self.0.join(room_channel(room_id));
    }

    fn leave_room(&self, room_id: RoomId) {
        self.0.leave(room_channel(room_id));
    }

    async fn broadcast(&self, room_id: RoomId, event: &ServerEvent) -> bool {
        // `to` on a socket excludes that socket
        match self.0.to(room_channel(room_id)).emit(event.name(), event).await {
            Ok(()) => true,
            Err(e) => {
                warn!("❌ [Socket.IO] Broadcast to room {} failed: {}", room_id, e);
                false
            }
        }
    }
}

pub async fn on_socket_connect(s: SocketRef, state: ServerState) {
    info!("🔌 [Socket.IO] Client connected: {}", s.id);
    register_connect_user_handler(&s, state.clone());
    register_queue_handler(&s, state.clone());
    register_cancel_handler(&s, state.clone());
    register_join_handler(&s, state.clone());
    register_leave_handler(&s, state.clone());
    register_send_handler(&s, state.clone());
    register_disconnect_handler(&s, state);
}

// Malformed payloads are validation errors: logged, never answered.
fn parse<T: DeserializeOwned>(event: &str, s: &SocketRef, value: serde_json::Value) -> Option<T> {
    match serde_json::from_value::<T>(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("❌ [JSON PARSE ERROR] {} from {}: {}", event, s.id, e);
            None
        }
    }
}

fn register_connect_user_handler(socket: &SocketRef, state: ServerState) {
    socket.on("connect_user", move |s: SocketRef, Data(value): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            let Some(payload) = parse::<ConnectPayload>("connect_user", &s, value) else { return };
            let sink: Arc<dyn ClientSink> = Arc::new(SocketSink(s.clone()));
            state.service.connect(&s.id.to_string(), sink, payload);
        }
    });
}

fn register_queue_handler(socket: &SocketRef, state: ServerState) {
    socket.on("queue_for_match", move |s: SocketRef, Data(value): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            let Some(payload) = parse::<QueuePayload>("queue_for_match", &s, value) else { return };
            state.service.queue_for_match(&s.id.to_string(), payload).await;
        }
    });
}

fn register_cancel_handler(socket: &SocketRef, state: ServerState) {
    socket.on("cancel_queue", move |s: SocketRef| {
        let state = state.clone();
        async move {
            state.service.cancel_queue(&s.id.to_string());
        }
    });
}

fn register_join_handler(socket: &SocketRef, state: ServerState) {
    socket.on("join_room", move |s: SocketRef, Data(value): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            let Some(payload) = parse::<RoomPayload>("join_room", &s, value) else { return };
            state.service.join_room(&s.id.to_string(), payload).await;
        }
    });
}

fn register_leave_handler(socket: &SocketRef, state: ServerState) {
    socket.on("leave_room", move |s: SocketRef, Data(value): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            let Some(payload) = parse::<RoomPayload>("leave_room", &s, value) else { return };
            state.service.leave_room(&s.id.to_string(), payload);
        }
    });
}

fn register_send_handler(socket: &SocketRef, state: ServerState) {
    socket.on("send_message", move |s: SocketRef, Data(value): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            let Some(payload) = parse::<SendMessagePayload>("send_message", &s, value) else { return };
            state.service.send_message(&s.id.to_string(), payload).await;
        }
    });
}

fn register_disconnect_handler(socket: &SocketRef, state: ServerState) {
    socket.on_disconnect(move |s: SocketRef| {
        let state = state.clone();
        async move {
            info!("🔌 [Socket.IO] Client disconnected: {}", s.id);
            state.service.disconnect(&s.id.to_string());
        }
    });
}
