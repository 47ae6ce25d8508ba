// src/testing.rs
//! In-memory doubles shared by the unit tests.

use crate::{
    error::GatewayError,
    gateway::PersistenceGateway,
    presence::ClientSink,
    types::{ChatMessage, Matched, NewMessage, RoomId, RoomMembers, ServerEvent},
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryGateway {
    messages: Mutex<Vec<ChatMessage>>,
    members: Mutex<HashMap<RoomId, RoomMembers>>,
    next_room: AtomicI64,
    append_calls: AtomicUsize,
    fail_appends: AtomicBool,
    fail_allocations: AtomicBool,
    fail_membership: AtomicBool,
    fail_fetches: AtomicBool,
    slow_appends: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_membership(&self, fail: bool) {
        self.fail_membership.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Each append sleeps a little less than the one before it, so appends
    /// that overlap finish in reverse order.
    pub fn slow_appends(&self, slow: bool) {
        self.slow_appends.store(slow, Ordering::SeqCst);
    }

    pub fn stored_texts(&self, room_id: RoomId) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.room_id == room_id)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn seed_message(&self, room_id: RoomId, sender: &str, text: &str) {
        self.messages.lock().unwrap().push(ChatMessage {
            room_id,
            sender_id: sender.to_string(),
            display_name: sender.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn rooms(&self) -> usize {
        self.members.lock().unwrap().len()
    }
}

fn down(what: &str) -> GatewayError {
    GatewayError::Unavailable(format!("{} rejected by test gateway", what))
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn append_message(
        &self,
        room_id: RoomId,
        message: &NewMessage,
    ) -> Result<ChatMessage, GatewayError> {
        let call = self.append_calls.fetch_add(1, Ordering::SeqCst) as u64;
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(down("append"));
        }
        if self.slow_appends.load(Ordering::SeqCst) {
            let ms = 20u64.saturating_sub(call * 4).max(1);
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let stored = ChatMessage {
            room_id,
            sender_id: message.sender_id.clone(),
            display_name: message.display_name.clone(),
            text: message.text.clone(),
            timestamp: Utc::now(),
        };
        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn fetch_recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(down("fetch"));
        }
        let messages = self.messages.lock().unwrap();
        let in_room: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        let skip = in_room.len().saturating_sub(limit);
        Ok(in_room.into_iter().skip(skip).collect())
    }

    async fn allocate_room_id(&self) -> Result<RoomId, GatewayError> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            return Err(down("allocate"));
        }
        Ok(self.next_room.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn record_membership(
        &self,
        room_id: RoomId,
        members: &RoomMembers,
    ) -> Result<(), GatewayError> {
        if self.fail_membership.load(Ordering::SeqCst) {
            return Err(down("membership"));
        }
        self.members.lock().unwrap().insert(room_id, members.clone());
        Ok(())
    }

    async fn fetch_membership(&self, room_id: RoomId) -> Result<Option<RoomMembers>, GatewayError> {
        Ok(self.members.lock().unwrap().get(&room_id).cloned())
    }
}

/// Stand-in for the Socket.IO room adapter: which sinks sit in which room.
#[derive(Default)]
pub struct Hub {
    sinks: Mutex<Vec<Weak<RecordingSink>>>,
    rooms: Mutex<HashMap<RoomId, HashSet<usize>>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sink(self: &Arc<Self>) -> Arc<RecordingSink> {
        let mut sinks = self.sinks.lock().unwrap();
        let sink = Arc::new(RecordingSink {
            id: sinks.len(),
            hub: self.clone(),
            events: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        sinks.push(Arc::downgrade(&sink));
        sink
    }

    fn others_in(&self, room_id: RoomId, except: usize) -> Vec<Arc<RecordingSink>> {
        let ids: Vec<usize> = self
            .rooms
            .lock()
            .unwrap()
            .get(&room_id)
            .map(|ids| ids.iter().copied().filter(|id| *id != except).collect())
            .unwrap_or_default();
        let sinks = self.sinks.lock().unwrap();
        let mut found: Vec<Arc<RecordingSink>> =
            ids.iter().filter_map(|id| sinks[*id].upgrade()).collect();
        found.sort_by_key(|s| s.id);
        found
    }
}

/// Records every delivered event; `close()` makes it behave like a dead socket,
/// which also drops it from every room.
pub struct RecordingSink {
    id: usize,
    hub: Arc<Hub>,
    events: Mutex<Vec<ServerEvent>>,
    closed: AtomicBool,
}

impl RecordingSink {
    /// A sink on a hub of its own.
    pub fn new() -> Arc<Self> {
        Hub::new().sink()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for members in self.hub.rooms.lock().unwrap().values_mut() {
            members.remove(&self.id);
        }
    }

    pub fn in_room(&self, room_id: RoomId) -> bool {
        self.hub
            .rooms
            .lock()
            .unwrap()
            .get(&room_id)
            .map_or(false, |ids| ids.contains(&self.id))
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(ServerEvent::name).collect()
    }

    pub fn matched(&self) -> Option<Matched> {
        self.events().into_iter().find_map(|e| match e {
            ServerEvent::Matched(m) => Some(m),
            _ => None,
        })
    }

    pub fn history_for(&self, room_id: RoomId) -> Option<Vec<ChatMessage>> {
        self.events().into_iter().find_map(|e| match e {
            ServerEvent::LoadMessages(load) if load.room_id == room_id => Some(load.messages),
            _ => None,
        })
    }

    pub fn received_texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::ReceiveMessage(m) => Some(m.text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ClientSink for RecordingSink {
    fn deliver(&self, event: &ServerEvent) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.events.lock().unwrap().push(event.clone());
        true
    }

    fn join_room(&self, room_id: RoomId) {
        if !self.closed.load(Ordering::SeqCst) {
            self.hub.rooms.lock().unwrap().entry(room_id).or_default().insert(self.id);
        }
    }

    fn leave_room(&self, room_id: RoomId) {
        if let Some(members) = self.hub.rooms.lock().unwrap().get_mut(&room_id) {
            members.remove(&self.id);
        }
    }

    async fn broadcast(&self, room_id: RoomId, event: &ServerEvent) -> bool {
        for other in self.hub.others_in(room_id, self.id) {
            other.deliver(event);
        }
        true
    }
}
