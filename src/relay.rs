// src/relay.rs
use crate::{
    error::ServiceError,
    gateway::PersistenceGateway,
    presence::{PresenceRegistry, Session},
    state::{self, RoomDirectory, RoomLocks},
    types::{ChatMessage, LoadMessages, NewMessage, RoomId, RoomMembers, ServerEvent},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

// Rosters cached at once; older ones are re-read from the store on demand.
const DIRECTORY_CAPACITY: usize = 1024;

/// Room broadcast groups: history replay on join, persist-then-fan-out on send.
///
/// Group membership is the connection's Socket.IO rooms (`unjoined -> joined -> left`);
/// the durable two-member roster of a room never changes.
pub struct MessageRelay {
    gateway: Arc<dyn PersistenceGateway>,
    presence: Arc<PresenceRegistry>,
    locks: RoomLocks,
    directory: RoomDirectory,
    history_limit: usize,
}

impl MessageRelay {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        presence: Arc<PresenceRegistry>,
        history_limit: usize,
    ) -> Self {
        Self {
            gateway,
            presence,
            locks: state::new_room_locks(),
            directory: state::new_room_directory(),
            history_limit,
        }
    }

    /// Caches the roster of a room, evicting an arbitrary entry when full.
    pub fn remember_room(&self, room_id: RoomId, members: RoomMembers) {
        if self.directory.len() >= DIRECTORY_CAPACITY && !self.directory.contains_key(&room_id) {
            let victim = self.directory.iter().next().map(|entry| *entry.key());
            if let Some(victim) = victim {
                self.directory.remove(&victim);
            }
        }
        self.directory.insert(room_id, members);
    }

    pub async fn membership(&self, room_id: RoomId) -> Result<RoomMembers, ServiceError> {
        if let Some(members) = self.directory.get(&room_id) {
            return Ok(members.value().clone());
        }
        match self.gateway.fetch_membership(room_id).await? {
            Some(members) => {
                self.remember_room(room_id, members.clone());
                Ok(members)
            }
            None => Err(ServiceError::not_found(format!("room {}", room_id))),
        }
    }

    fn room_lock(&self, room_id: RoomId) -> Arc<Mutex<()>> {
        self.locks.entry(room_id).or_default().clone()
    }

    // Clones are only taken under the map's shard lock, so a count of one means
    // nobody holds or waits on this lock.
    fn release_lock(&self, room_id: RoomId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(&room_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Admits a member's connection and replays the latest history to it alone.
    /// Returns the number of replayed messages.
    pub async fn join(&self, conn_id: &str, room_id: RoomId) -> Result<usize, ServiceError> {
        let session = self
            .presence
            .session(conn_id)
            .ok_or_else(|| ServiceError::validation("join_room before connect_user"))?;

        let members = self.membership(room_id).await?;
        if !members.contains(&session.user_id) {
            return Err(ServiceError::not_found(format!("room {}", room_id)));
        }

        // sends wait until the joiner has its history, so nothing is seen twice or skipped
        let lock = self.room_lock(room_id);
        let replayed = {
            let _guard = lock.lock().await;
            self.replay_and_admit(&session, room_id).await
        };
        self.release_lock(room_id, lock);

        let count = replayed?;
        info!("📜 [RELAY] {} joined room {} ({} messages replayed)", session.user_id, room_id, count);
        Ok(count)
    }

    async fn replay_and_admit(&self, session: &Session, room_id: RoomId) -> Result<usize, ServiceError> {
        let messages = self
            .gateway
            .fetch_recent_messages(room_id, self.history_limit)
            .await?;
        let count = messages.len();
        // only a connection that got its history joins the group
        session.join_room(room_id);
        session.deliver(&ServerEvent::LoadMessages(LoadMessages { room_id, messages }));
        Ok(count)
    }

    /// Removes the connection from the group. Durable membership is untouched.
    pub fn leave(&self, conn_id: &str, room_id: RoomId) -> bool {
        match self.presence.session(conn_id) {
            Some(session) => {
                session.leave_room(room_id);
                true
            }
            None => false,
        }
    }

    /// Persists the message, then pushes the stored record to every other
    /// connection in the group. The sender is the connection's user; an empty
    /// display name or text is rejected before any I/O.
    pub async fn send(
        &self,
        conn_id: &str,
        room_id: RoomId,
        display_name: &str,
        text: &str,
    ) -> Result<ChatMessage, ServiceError> {
        if display_name.trim().is_empty() {
            return Err(ServiceError::validation("send_message without sender"));
        }
        if text.trim().is_empty() {
            return Err(ServiceError::validation("send_message without text"));
        }
        let session = self
            .presence
            .session(conn_id)
            .ok_or_else(|| ServiceError::validation("send_message before connect_user"))?;

        let members = self.membership(room_id).await?;
        if !members.contains(&session.user_id) {
            return Err(ServiceError::not_found(format!("room {}", room_id)));
        }

        let lock = self.room_lock(room_id);
        let sent = {
            let _guard = lock.lock().await;
            self.persist_and_fan_out(&session, room_id, display_name, text).await
        };
        self.release_lock(room_id, lock);
        sent
    }

    async fn persist_and_fan_out(
        &self,
        session: &Session,
        room_id: RoomId,
        display_name: &str,
        text: &str,
    ) -> Result<ChatMessage, ServiceError> {
        let message = NewMessage {
            sender_id: session.user_id.clone(),
            display_name: display_name.to_string(),
            text: text.to_string(),
        };
        let stored = self.gateway.append_message(room_id, &message).await?;

        let event = ServerEvent::ReceiveMessage(stored.clone());
        let broadcast = session.broadcast(room_id, &event).await;
        debug!("💬 [RELAY] room {} message from {} (broadcast ok: {})", room_id, session.user_id, broadcast);
        Ok(stored)
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.locks.len()
    }

    #[cfg(test)]
    fn cached_rosters(&self) -> usize {
        self.directory.len()
    }
}
