// src/config.rs
use tracing::warn;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    // "*" allows any origin
    pub cors_origin: String,
    /// Messages replayed to a connection joining a room.
    pub history_limit: usize,
    /// Per-socket Socket.IO send buffer.
    pub max_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_url: "sqlite:./data/tagmatch.db".to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            history_limit: 50,
            max_buffer_size: 4096,
        }
    }

    /// Defaults overridden by `TAGMATCH_*` / `DATABASE_URL` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        if let Some(v) = lookup("TAGMATCH_BIND") {
            config.bind_addr = v;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            config.database_url = v;
        }
        if let Some(v) = lookup("TAGMATCH_CORS_ORIGIN") {
            config.cors_origin = v;
        }
        if let Some(v) = lookup("TAGMATCH_HISTORY_LIMIT") {
            config.history_limit = parse_or(&v, "TAGMATCH_HISTORY_LIMIT", config.history_limit);
        }
        if let Some(v) = lookup("TAGMATCH_MAX_BUFFER") {
            config.max_buffer_size = parse_or(&v, "TAGMATCH_MAX_BUFFER", config.max_buffer_size);
        }
        config
    }
}

fn parse_or(raw: &str, key: &str, fallback: usize) -> usize {
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => v,
        _ => {
            warn!("⚠️ [CONFIG] Ignoring invalid {}={:?}, using {}", key, raw, fallback);
            fallback
        }
    }
}
