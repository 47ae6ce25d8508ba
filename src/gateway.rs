// src/gateway.rs
use crate::error::GatewayError;
use crate::types::{ChatMessage, NewMessage, RoomId, RoomMembers};
use async_trait::async_trait;

/// Durable storage consumed by the room manager and the message relay.
/// Every call is a suspension point; nothing else in the core awaits.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Appends a message; the stored record carries the server timestamp.
    async fn append_message(
        &self,
        room_id: RoomId,
        message: &NewMessage,
    ) -> Result<ChatMessage, GatewayError>;

    /// Most recent `limit` messages of the room, oldest first.
    async fn fetch_recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, GatewayError>;

    /// Unique, strictly increasing room id. Safe under concurrent callers.
    async fn allocate_room_id(&self) -> Result<RoomId, GatewayError>;

    async fn record_membership(
        &self,
        room_id: RoomId,
        members: &RoomMembers,
    ) -> Result<(), GatewayError>;

    /// `None` when the room was never recorded.
    async fn fetch_membership(&self, room_id: RoomId) -> Result<Option<RoomMembers>, GatewayError>;
}
