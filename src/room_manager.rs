// src/room_manager.rs
use crate::{
    chat_index::ExistingChatIndex,
    error::GatewayError,
    gateway::PersistenceGateway,
    matcher::{Pairing, PreferenceMatcher},
    presence::PresenceRegistry,
    relay::MessageRelay,
    types::{DisplayMeta, Matched, Queued, RoomId, RoomMembers, ServerEvent},
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct RoomManager {
    gateway: Arc<dyn PersistenceGateway>,
    index: Arc<ExistingChatIndex>,
    matcher: Arc<PreferenceMatcher>,
    presence: Arc<PresenceRegistry>,
    relay: Arc<MessageRelay>,
}

impl RoomManager {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        index: Arc<ExistingChatIndex>,
        matcher: Arc<PreferenceMatcher>,
        presence: Arc<PresenceRegistry>,
        relay: Arc<MessageRelay>,
    ) -> Self {
        Self {
            gateway,
            index,
            matcher,
            presence,
            relay,
        }
    }

    /// Allocates a room id, records both members durably and links the pair.
    pub async fn create_room(&self, user_a: &str, user_b: &str) -> Result<RoomId, GatewayError> {
        let room_id = self.gateway.allocate_room_id().await?;
        let members = RoomMembers::new(user_a, user_b);
        self.gateway.record_membership(room_id, &members).await?;
        self.index.link(user_a, user_b);
        self.relay.remember_room(room_id, members);
        info!("🏠 [ROOMS] Room {} created for {} & {}", room_id, user_a, user_b);
        Ok(room_id)
    }

    /// Turns a matcher hit into a room and tells both sides. If the room cannot
    /// be persisted the pairing is rolled back and both users get `match_error`;
    /// whoever is still waiting goes back into the pool.
    pub async fn open_pairing(&self, pairing: Pairing) -> Option<RoomId> {
        let caller = pairing.caller.user_id.clone();
        let peer = pairing.peer.user_id.clone();

        let room_id = match self.create_room(&caller, &peer).await {
            Ok(room_id) => room_id,
            Err(e) => {
                error!("❌ [ROOMS] Could not open room for {} & {}: {}", caller, peer, e);
                let restored = self.matcher.abandon(pairing);
                let failure = ServerEvent::match_error("could not create a room, please retry");
                for user in [&caller, &peer] {
                    self.presence.notify_user(user, &failure);
                    if restored.contains(user) {
                        warn!("↩️ [ROOMS] {} put back into the pool", user);
                        self.presence.notify_user(user, &ServerEvent::Queued(Queued {}));
                    }
                }
                return None;
            }
        };
        self.matcher.complete(&pairing);

        for (user, other) in [(&caller, &peer), (&peer, &caller)] {
            // gone since the match: nothing to admit or notify
            let Some(session) = self.presence.lookup(user) else {
                info!("📭 [ROOMS] {} disconnected before room {} opened", user, room_id);
                continue;
            };
            let peer_display_meta = self
                .presence
                .lookup(other)
                .map(|s| s.display_meta.clone())
                .unwrap_or_else(|| DisplayMeta::named(other.as_str()));

            session.join_room(room_id);
            session.deliver(&ServerEvent::Matched(Matched {
                room_id,
                peer_id: other.clone(),
                peer_display_meta,
            }));
        }
        Some(room_id)
    }
}
