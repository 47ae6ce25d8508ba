// src/state.rs
use super::types::{RoomId, RoomMembers};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

// Per-room send lock: persist + fan-out of one message completes before the next starts.
// Entries exist only while some join or send holds them.
pub type RoomLocks = Arc<DashMap<RoomId, Arc<Mutex<()>>>>;

// Durable membership, cached after creation or first lookup (bounded, see relay)
pub type RoomDirectory = Arc<DashMap<RoomId, RoomMembers>>;

pub fn new_room_locks() -> RoomLocks {
    Arc::new(DashMap::new())
}

pub fn new_room_directory() -> RoomDirectory {
    Arc::new(DashMap::new())
}
