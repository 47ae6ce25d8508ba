// src/store.rs

use crate::{
    error::GatewayError,
    gateway::PersistenceGateway,
    types::{ChatMessage, NewMessage, RoomId, RoomMembers},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
        SqliteSynchronous,
    },
    Row,
};
use std::str::FromStr;
use tracing::info;

/// SQLite-backed persistence gateway.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Opens (creating if needed) the database and makes sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, GatewayError> {
        if let Some(parent) = std::path::Path::new(&database_url.replace("sqlite:", "")).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| GatewayError::Unavailable(format!("create {:?}: {}", parent, e)))?;
            }
        }

        let opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("busy_timeout", "5000");

        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(opts)
            .await?;

        let gateway = Self { pool };
        gateway.init_schema().await?;
        Ok(gateway)
    }

    /// Wraps an existing pool. The caller is responsible for `init_schema`.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), GatewayError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS room_members (
                room_id INTEGER NOT NULL REFERENCES rooms(id),
                user_id TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_id INTEGER NOT NULL,
                sender_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_room_seq ON messages (room_id, id)")
            .execute(&self.pool)
            .await?;

        info!("🗃️ 'rooms', 'room_members' and 'messages' tables are ready.");
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn append_message(
        &self,
        room_id: RoomId,
        message: &NewMessage,
    ) -> Result<ChatMessage, GatewayError> {
        let timestamp = Utc::now();
        sqlx::query(
            "INSERT INTO messages (room_id, sender_id, display_name, text, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(room_id)
        .bind(&message.sender_id)
        .bind(&message.display_name)
        .bind(&message.text)
        .bind(timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(ChatMessage {
            room_id,
            sender_id: message.sender_id.clone(),
            display_name: message.display_name.clone(),
            text: message.text.clone(),
            timestamp,
        })
    }

    async fn fetch_recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ChatMessage>(
            "SELECT room_id, sender_id, display_name, text, created_at FROM (
                SELECT id, room_id, sender_id, display_name, text, created_at FROM messages
                WHERE room_id = ? ORDER BY id DESC LIMIT ?
            ) ORDER BY id ASC",
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn allocate_room_id(&self) -> Result<RoomId, GatewayError> {
        // AUTOINCREMENT never reuses ids, and each insert is its own write
        let result = sqlx::query("INSERT INTO rooms (created_at) VALUES (?)")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn record_membership(
        &self,
        room_id: RoomId,
        members: &RoomMembers,
    ) -> Result<(), GatewayError> {
        let mut tx = self.pool.begin().await?;
        for user_id in members.as_array() {
            sqlx::query("INSERT OR IGNORE INTO room_members (room_id, user_id) VALUES (?, ?)")
                .bind(room_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_membership(&self, room_id: RoomId) -> Result<Option<RoomMembers>, GatewayError> {
        let users: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM room_members WHERE room_id = ? ORDER BY rowid ASC")
                .bind(room_id)
                .fetch_all(&self.pool)
                .await?;
        match users.as_slice() {
            [first, second] => Ok(Some(RoomMembers::new(first.clone(), second.clone()))),
            _ => Ok(None),
        }
    }
}

impl sqlx::FromRow<'_, SqliteRow> for ChatMessage {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let ms: i64 = row.try_get("created_at")?;
        Ok(ChatMessage {
            room_id: row.try_get("room_id")?,
            sender_id: row.try_get("sender_id")?,
            display_name: row.try_get("display_name")?,
            text: row.try_get("text")?,
            timestamp: DateTime::from_timestamp_millis(ms).unwrap_or_default(),
        })
    }
}
