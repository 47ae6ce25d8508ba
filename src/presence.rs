// src/presence.rs
use crate::matcher::PreferenceMatcher;
use crate::types::{ConnId, DisplayMeta, RoomId, ServerEvent, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Outbound side of one live connection, including its room broadcast groups.
/// Group membership lives with the transport and goes away with the connection.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Pushes an event to the client. Returns false once the connection is gone;
    /// callers treat that as a no-op.
    fn deliver(&self, event: &ServerEvent) -> bool;

    fn join_room(&self, room_id: RoomId);

    fn leave_room(&self, room_id: RoomId);

    /// Sends to every other connection in the room's group.
    async fn broadcast(&self, room_id: RoomId, event: &ServerEvent) -> bool;
}

pub struct Session {
    pub conn_id: ConnId,
    pub user_id: UserId,
    pub display_meta: DisplayMeta,
    sink: Arc<dyn ClientSink>,
}

impl Session {
    pub fn deliver(&self, event: &ServerEvent) -> bool {
        let delivered = self.sink.deliver(event);
        if !delivered {
            debug!("📭 [PRESENCE] {} dropped for closed conn {}", event.name(), self.conn_id);
        }
        delivered
    }

    pub fn join_room(&self, room_id: RoomId) {
        self.sink.join_room(room_id);
        debug!("➕ [PRESENCE] conn {} joined group {}", self.conn_id, room_id);
    }

    pub fn leave_room(&self, room_id: RoomId) {
        self.sink.leave_room(room_id);
        debug!("➖ [PRESENCE] conn {} left group {}", self.conn_id, room_id);
    }

    pub async fn broadcast(&self, room_id: RoomId, event: &ServerEvent) -> bool {
        self.sink.broadcast(room_id, event).await
    }
}

/// Live connection <-> user identity, both directions.
pub struct PresenceRegistry {
    by_conn: DashMap<ConnId, Arc<Session>>,
    // latest connection per user
    by_user: DashMap<UserId, ConnId>,
    matcher: Arc<PreferenceMatcher>,
}

impl PresenceRegistry {
    pub fn new(matcher: Arc<PreferenceMatcher>) -> Self {
        Self {
            by_conn: DashMap::new(),
            by_user: DashMap::new(),
            matcher,
        }
    }

    /// Binds `conn_id` to `user_id`. A connection re-registering under another
    /// identity releases the old one first.
    pub fn register(
        &self,
        conn_id: &str,
        user_id: &str,
        display_meta: DisplayMeta,
        sink: Arc<dyn ClientSink>,
    ) -> Arc<Session> {
        let session = Arc::new(Session {
            conn_id: conn_id.to_string(),
            user_id: user_id.to_string(),
            display_meta,
            sink,
        });

        if let Some(previous) = self.by_conn.insert(conn_id.to_string(), session.clone()) {
            if previous.user_id != user_id {
                self.release_user(&previous.user_id, conn_id);
            }
        }
        if let Some(old_conn) = self.by_user.insert(user_id.to_string(), conn_id.to_string()) {
            if old_conn != conn_id {
                info!("🔁 [PRESENCE] {} moved from conn {} to {}", user_id, old_conn, conn_id);
            }
        }
        info!("🟢 [PRESENCE] {} registered on conn {}", user_id, conn_id);
        session
    }

    /// Drops the connection. If it was the user's current connection the user
    /// is also withdrawn from the matching pool.
    pub fn unregister(&self, conn_id: &str) -> Option<Arc<Session>> {
        let (_, session) = self.by_conn.remove(conn_id)?;
        self.release_user(&session.user_id, conn_id);
        info!("🔴 [PRESENCE] {} left (conn {})", session.user_id, conn_id);
        Some(session)
    }

    fn release_user(&self, user_id: &str, conn_id: &str) {
        if self.by_user.remove_if(user_id, |_, current| current == conn_id).is_some() {
            self.matcher.cancel(user_id);
        }
    }

    pub fn lookup(&self, user_id: &str) -> Option<Arc<Session>> {
        let conn_id = self.by_user.get(user_id)?.value().clone();
        self.session(&conn_id)
    }

    pub fn session(&self, conn_id: &str) -> Option<Arc<Session>> {
        self.by_conn.get(conn_id).map(|entry| entry.value().clone())
    }

    /// Delivers to the user's current connection, if any.
    pub fn notify_user(&self, user_id: &str, event: &ServerEvent) -> bool {
        match self.lookup(user_id) {
            Some(session) => session.deliver(event),
            None => false,
        }
    }

    pub fn notify_conn(&self, conn_id: &str, event: &ServerEvent) -> bool {
        match self.session(conn_id) {
            Some(session) => session.deliver(event),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }
}
