// src/service.rs
use crate::{
    chat_index::ExistingChatIndex,
    config::Config,
    error::ServiceError,
    gateway::PersistenceGateway,
    matcher::{PreferenceMatcher, SubmitOutcome},
    presence::{ClientSink, PresenceRegistry},
    relay::MessageRelay,
    room_manager::RoomManager,
    types::{
        ConnectPayload, PreferenceSet, QueuePayload, Queued, RoomPayload, SendMessagePayload,
        ServerEvent,
    },
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which outbound error event an operation reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Connect,
    Queue,
    Join,
    Send,
}

impl Op {
    fn label(self) -> &'static str {
        match self {
            Op::Connect => "connect_user",
            Op::Queue => "queue_for_match",
            Op::Join => "join_room",
            Op::Send => "send_message",
        }
    }

    fn error_event(self, reason: String) -> Option<ServerEvent> {
        match self {
            Op::Connect => None,
            Op::Queue => Some(ServerEvent::match_error(reason)),
            Op::Join => Some(ServerEvent::room_history_error(reason)),
            Op::Send => Some(ServerEvent::send_error(reason)),
        }
    }
}

/// Entry point for every inbound socket event. Owns the presence registry,
/// matcher, room manager and relay and wires them together.
pub struct ChatService {
    index: Arc<ExistingChatIndex>,
    matcher: Arc<PreferenceMatcher>,
    presence: Arc<PresenceRegistry>,
    relay: Arc<MessageRelay>,
    rooms: RoomManager,
}

impl ChatService {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: &Config) -> Self {
        let index = Arc::new(ExistingChatIndex::new());
        let matcher = Arc::new(PreferenceMatcher::new(index.clone()));
        let presence = Arc::new(PresenceRegistry::new(matcher.clone()));
        let relay = Arc::new(MessageRelay::new(
            gateway.clone(),
            presence.clone(),
            config.history_limit,
        ));
        let rooms = RoomManager::new(
            gateway,
            index.clone(),
            matcher.clone(),
            presence.clone(),
            relay.clone(),
        );
        Self {
            index,
            matcher,
            presence,
            relay,
            rooms,
        }
    }

    pub fn online(&self) -> usize {
        self.presence.len()
    }

    pub fn seeking(&self) -> usize {
        self.matcher.len()
    }

    #[cfg(test)]
    fn index(&self) -> &ExistingChatIndex {
        &self.index
    }

    // Validation failures are logged and dropped; everything else goes back to
    // the originating connection as the operation's error event.
    fn report(&self, conn_id: &str, op: Op, err: ServiceError) {
        match &err {
            ServiceError::Validation(_) => {
                warn!("⚠️ [{}] Dropped from conn {}: {}", op.label(), conn_id, err);
                return;
            }
            ServiceError::NotFound(_) => warn!("🔍 [{}] conn {}: {}", op.label(), conn_id, err),
            ServiceError::Persistence(_) => error!("❌ [{}] conn {}: {}", op.label(), conn_id, err),
        }
        if let Some(event) = op.error_event(err.client_reason()) {
            self.presence.notify_conn(conn_id, &event);
        }
    }

    // ==========================================================================
    // Inbound events
    // ==========================================================================

    pub fn connect(&self, conn_id: &str, sink: Arc<dyn ClientSink>, payload: ConnectPayload) {
        if let Err(e) = self.try_connect(conn_id, sink, payload) {
            self.report(conn_id, Op::Connect, e);
        }
    }

    fn try_connect(
        &self,
        conn_id: &str,
        sink: Arc<dyn ClientSink>,
        payload: ConnectPayload,
    ) -> Result<(), ServiceError> {
        let user_id = payload.user_id.trim();
        if user_id.is_empty() {
            return Err(ServiceError::validation("connect_user without userId"));
        }
        let mut meta = payload.display_meta;
        if meta.name.trim().is_empty() {
            meta.name = user_id.to_string();
        }
        self.presence.register(conn_id, user_id, meta, sink);
        let seeded = self.index.seed(user_id, &payload.existing_peer_ids);
        if seeded > 0 {
            info!("📇 [CONNECT] {} brought {} existing pairings", user_id, seeded);
        }
        Ok(())
    }

    pub async fn queue_for_match(&self, conn_id: &str, payload: QueuePayload) {
        if let Err(e) = self.try_queue_for_match(conn_id, payload).await {
            self.report(conn_id, Op::Queue, e);
        }
    }

    async fn try_queue_for_match(&self, conn_id: &str, payload: QueuePayload) -> Result<(), ServiceError> {
        let session = self
            .presence
            .session(conn_id)
            .ok_or_else(|| ServiceError::validation("queue_for_match before connect_user"))?;
        let prefs = PreferenceSet::new(payload.preference_tags);
        if prefs.is_empty() {
            return Err(ServiceError::validation("queue_for_match without preferenceTags"));
        }

        match self.matcher.submit(&session.user_id, prefs) {
            SubmitOutcome::Queued => {
                session.deliver(&ServerEvent::Queued(Queued {}));
            }
            SubmitOutcome::Matched(pairing) => {
                self.rooms.open_pairing(pairing).await;
            }
        }
        Ok(())
    }

    pub fn cancel_queue(&self, conn_id: &str) {
        match self.presence.session(conn_id) {
            Some(session) => {
                self.matcher.cancel(&session.user_id);
            }
            None => warn!("⚠️ [cancel_queue] Dropped from unregistered conn {}", conn_id),
        }
    }

    pub async fn join_room(&self, conn_id: &str, payload: RoomPayload) {
        if let Err(e) = self.relay.join(conn_id, payload.room_id).await {
            self.report(conn_id, Op::Join, e);
        }
    }

    pub fn leave_room(&self, conn_id: &str, payload: RoomPayload) {
        self.relay.leave(conn_id, payload.room_id);
    }

    pub async fn send_message(&self, conn_id: &str, payload: SendMessagePayload) {
        if let Err(e) = self.try_send_message(conn_id, payload).await {
            self.report(conn_id, Op::Send, e);
        }
    }

    async fn try_send_message(&self, conn_id: &str, payload: SendMessagePayload) -> Result<(), ServiceError> {
        // a missing sender or text is rejected by the relay before any I/O
        let display_name = payload.sender.unwrap_or_default();
        let text = payload.text.unwrap_or_default();

        self.relay
            .send(conn_id, payload.room_id, &display_name, &text)
            .await?;
        Ok(())
    }

    /// Releases presence and pool entry. Group memberships go with the socket;
    /// stored rooms and messages stay.
    pub fn disconnect(&self, conn_id: &str) {
        if let Some(session) = self.presence.unregister(conn_id) {
            info!("👋 [DISCONNECT] {} (conn {})", session.user_id, conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Hub, MemoryGateway, RecordingSink};
    use crate::types::DisplayMeta;

    struct Harness {
        svc: ChatService,
        hub: Arc<Hub>,
    }

    impl std::ops::Deref for Harness {
        type Target = ChatService;

        fn deref(&self) -> &ChatService {
            &self.svc
        }
    }

    fn service() -> (Harness, Arc<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::new());
        let svc = ChatService::new(gateway.clone(), &Config::new());
        (Harness { svc, hub: Hub::new() }, gateway)
    }

    fn connect(svc: &Harness, conn: &str, user: &str, peers: &[&str]) -> Arc<RecordingSink> {
        let sink = svc.hub.sink();
        svc.connect(
            conn,
            sink.clone(),
            ConnectPayload {
                user_id: user.to_string(),
                existing_peer_ids: peers.iter().map(|p| p.to_string()).collect(),
                display_meta: DisplayMeta::named(user.to_uppercase()),
            },
        );
        sink
    }

    fn queue(tags: &[&str]) -> QueuePayload {
        QueuePayload {
            preference_tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn say(room_id: i64, sender: Option<&str>, text: Option<&str>) -> SendMessagePayload {
        SendMessagePayload {
            room_id,
            sender: sender.map(str::to_string),
            text: text.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn overlapping_users_share_one_new_room() {
        let (svc, gateway) = service();
        let a = connect(&svc, "ca", "a", &[]);
        let b = connect(&svc, "cb", "b", &[]);

        svc.queue_for_match("ca", queue(&["x", "y"])).await;
        assert_eq!(a.names(), vec!["queued"]);
        svc.queue_for_match("cb", queue(&["y", "z"])).await;

        let room = a.matched().unwrap().room_id;
        assert_eq!(b.matched().unwrap().room_id, room);
        assert_eq!(a.matched().unwrap().peer_display_meta.name, "B");
        assert!(svc.index().contains("a", "b") && svc.index().contains("b", "a"));

        // already paired: no second room, A just waits
        svc.queue_for_match("ca", queue(&["y"])).await;
        svc.queue_for_match("cb", queue(&["y"])).await;
        assert_eq!(gateway.rooms(), 1);
        assert_eq!(svc.seeking(), 2);
    }

    #[tokio::test]
    async fn cancelled_request_never_matches_later() {
        let (svc, gateway) = service();
        let a = connect(&svc, "ca", "a", &[]);
        let c = connect(&svc, "cc", "c", &[]);

        svc.queue_for_match("ca", queue(&["x", "y"])).await;
        svc.cancel_queue("ca");
        svc.queue_for_match("cc", queue(&["y"])).await;

        assert!(a.matched().is_none());
        assert_eq!(c.names(), vec!["queued"]);
        assert_eq!(gateway.rooms(), 0);
    }

    #[tokio::test]
    async fn existing_peers_from_connect_block_rematching() {
        let (svc, gateway) = service();
        connect(&svc, "ca", "a", &["b"]);
        let b = connect(&svc, "cb", "b", &[]);
        svc.queue_for_match("ca", queue(&["x"])).await;
        svc.queue_for_match("cb", queue(&["x"])).await;
        assert!(b.matched().is_none());
        assert_eq!(gateway.rooms(), 0);
    }

    #[tokio::test]
    async fn disconnect_withdraws_from_the_pool() {
        let (svc, _) = service();
        connect(&svc, "ca", "a", &[]);
        let c = connect(&svc, "cc", "c", &[]);
        svc.queue_for_match("ca", queue(&["x"])).await;
        svc.disconnect("ca");
        assert_eq!(svc.online(), 1);

        svc.queue_for_match("cc", queue(&["x"])).await;
        assert_eq!(c.names(), vec!["queued"]);
    }

    #[tokio::test]
    async fn events_before_connect_or_without_tags_are_dropped() {
        let (svc, _) = service();
        svc.queue_for_match("ghost", queue(&["x"])).await;
        assert_eq!(svc.seeking(), 0);

        let a = connect(&svc, "ca", "a", &[]);
        svc.queue_for_match("ca", queue(&[])).await;
        assert!(a.events().is_empty());
        assert_eq!(svc.seeking(), 0);
    }

    #[tokio::test]
    async fn chat_flow_replays_history_and_relays_messages() {
        let (svc, gateway) = service();
        let a = connect(&svc, "ca", "a", &[]);
        let b = connect(&svc, "cb", "b", &[]);
        svc.queue_for_match("ca", queue(&["x"])).await;
        svc.queue_for_match("cb", queue(&["x"])).await;
        let room = a.matched().unwrap().room_id;

        svc.send_message("ca", say(room, Some("alice"), Some("hi"))).await;
        assert_eq!(b.received_texts(), vec!["hi"]);
        assert!(a.received_texts().is_empty());

        // empty text and missing text: no storage, no broadcast, no reply
        svc.send_message("ca", say(room, Some("alice"), Some(""))).await;
        svc.send_message("ca", say(room, Some("alice"), None)).await;
        assert_eq!(gateway.append_calls(), 1);
        assert!(!a.names().contains(&"send_error"));

        b.close();
        svc.disconnect("cb");
        let b2 = connect(&svc, "cb2", "b", &[]);
        svc.join_room("cb2", RoomPayload { room_id: room }).await;
        let history = b2.history_for(room).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].display_name, "alice");
        assert!(a.history_for(room).is_none());
    }

    #[tokio::test]
    async fn send_without_sender_is_dropped_before_storage() {
        let (svc, gateway) = service();
        let a = connect(&svc, "ca", "a", &[]);
        let b = connect(&svc, "cb", "b", &[]);
        svc.queue_for_match("ca", queue(&["x"])).await;
        svc.queue_for_match("cb", queue(&["x"])).await;
        let room = a.matched().unwrap().room_id;

        svc.send_message("ca", say(room, None, Some("hi"))).await;
        svc.send_message("ca", say(room, Some("  "), Some("hi"))).await;

        assert_eq!(gateway.append_calls(), 0);
        assert!(b.received_texts().is_empty());
        assert!(!a.names().contains(&"send_error"));
    }

    #[tokio::test]
    async fn sender_id_comes_from_the_connection() {
        let (svc, _) = service();
        let a = connect(&svc, "ca", "a", &[]);
        let b = connect(&svc, "cb", "b", &[]);
        svc.queue_for_match("ca", queue(&["x"])).await;
        svc.queue_for_match("cb", queue(&["x"])).await;
        let room = a.matched().unwrap().room_id;

        svc.send_message("cb", say(room, Some("Bobby"), Some("yo"))).await;
        let received = a
            .events()
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::ReceiveMessage(m) => Some(m),
                _ => None,
            })
            .unwrap();
        assert_eq!(received.display_name, "Bobby");
        assert_eq!(received.sender_id, "b");
        assert!(b.received_texts().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_on_send_reports_to_sender_only() {
        let (svc, gateway) = service();
        let a = connect(&svc, "ca", "a", &[]);
        let b = connect(&svc, "cb", "b", &[]);
        svc.queue_for_match("ca", queue(&["x"])).await;
        svc.queue_for_match("cb", queue(&["x"])).await;
        let room = a.matched().unwrap().room_id;
        gateway.fail_appends(true);

        svc.send_message("ca", say(room, Some("a"), Some("lost"))).await;
        assert_eq!(a.names().last(), Some(&"send_error"));
        assert_eq!(b.names(), vec!["matched"]);
    }

    #[tokio::test]
    async fn unknown_room_reports_history_and_send_errors() {
        let (svc, _) = service();
        let a = connect(&svc, "ca", "a", &[]);
        svc.join_room("ca", RoomPayload { room_id: 404 }).await;
        svc.send_message("ca", say(404, Some("a"), Some("hello?"))).await;
        assert_eq!(a.names(), vec!["room_history_error", "send_error"]);
    }

    #[tokio::test]
    async fn room_creation_failure_reports_match_error_and_requeues() {
        let (svc, gateway) = service();
        let a = connect(&svc, "ca", "a", &[]);
        let b = connect(&svc, "cb", "b", &[]);
        gateway.fail_allocations(true);

        svc.queue_for_match("ca", queue(&["x"])).await;
        svc.queue_for_match("cb", queue(&["x"])).await;

        assert_eq!(a.names(), vec!["queued", "match_error", "queued"]);
        assert_eq!(b.names(), vec!["match_error", "queued"]);
        assert_eq!(svc.seeking(), 2);
        assert!(!svc.index().contains("a", "b"));

        // storage is back: the next submission pairs them
        gateway.fail_allocations(false);
        svc.queue_for_match("cb", queue(&["x"])).await;
        assert!(a.matched().is_some());
        assert!(b.matched().is_some());
    }

    #[tokio::test]
    async fn matched_is_not_delivered_to_a_closed_connection() {
        let (svc, _) = service();
        let a = connect(&svc, "ca", "a", &[]);
        let b = connect(&svc, "cb", "b", &[]);
        svc.queue_for_match("ca", queue(&["x"])).await;
        a.close();
        svc.queue_for_match("cb", queue(&["x"])).await;
        assert!(a.matched().is_none());
        assert!(b.matched().is_some());
    }
}
