// src/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type UserId = String;
pub type RoomId = i64;
/// Socket.IO session id of a live connection, as a string.
pub type ConnId = String;

// ==============================================================================
// 1. Domain values
// ==============================================================================

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl DisplayMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            avatar_url: None,
        }
    }
}

/// Opaque tag ids (track / artist / genre) a seeker wants to share with a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceSet(HashSet<String>);

impl PreferenceSet {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            tags.into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.is_empty())
                .collect(),
        )
    }

    pub fn intersects(&self, other: &PreferenceSet) -> bool {
        let (small, large) = if self.0.len() <= other.0.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.0.iter().any(|t| large.0.contains(t))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// The two members of a room. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMembers {
    pub first: UserId,
    pub second: UserId,
}

impl RoomMembers {
    pub fn new(first: impl Into<UserId>, second: impl Into<UserId>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.first == user_id || self.second == user_id
    }

    pub fn as_array(&self) -> [&UserId; 2] {
        [&self.first, &self.second]
    }
}

/// Message about to be appended; the store assigns the timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub display_name: String,
    pub text: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    #[serde(rename = "sender")]
    pub display_name: String,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

// ==============================================================================
// 2. Inbound payloads
// ==============================================================================

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    pub user_id: String,
    #[serde(default)]
    pub existing_peer_ids: Vec<String>,
    #[serde(default)]
    pub display_meta: DisplayMeta,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueuePayload {
    #[serde(default)]
    pub preference_tags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_id: RoomId,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: RoomId,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

// ==============================================================================
// 3. Outbound events
// ==============================================================================

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct Queued {}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Matched {
    pub room_id: RoomId,
    pub peer_id: UserId,
    pub peer_display_meta: DisplayMeta,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadMessages {
    pub room_id: RoomId,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ErrorPayload {
    pub reason: String,
}

/// Everything the server pushes to a connection. Serializes as the bare payload;
/// the event name travels separately.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ServerEvent {
    Queued(Queued),
    Matched(Matched),
    MatchError(ErrorPayload),
    LoadMessages(LoadMessages),
    ReceiveMessage(ChatMessage),
    SendError(ErrorPayload),
    RoomHistoryError(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Queued(_) => "queued",
            ServerEvent::Matched(_) => "matched",
            ServerEvent::MatchError(_) => "match_error",
            ServerEvent::LoadMessages(_) => "load_messages",
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::SendError(_) => "send_error",
            ServerEvent::RoomHistoryError(_) => "room_history_error",
        }
    }

    pub fn match_error(reason: impl Into<String>) -> Self {
        ServerEvent::MatchError(ErrorPayload { reason: reason.into() })
    }

    pub fn send_error(reason: impl Into<String>) -> Self {
        ServerEvent::SendError(ErrorPayload { reason: reason.into() })
    }

    pub fn room_history_error(reason: impl Into<String>) -> Self {
        ServerEvent::RoomHistoryError(ErrorPayload { reason: reason.into() })
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub online: usize,
    pub seeking: usize,
}
