// src/chat_index.rs
use crate::types::UserId;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Which user pairs already share a room. Both directions are written under one
/// lock, so `b ∈ peers(a)` holds exactly when `a ∈ peers(b)`.
#[derive(Default)]
pub struct ExistingChatIndex {
    pairs: Mutex<HashMap<UserId, HashSet<UserId>>>,
}

impl ExistingChatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<UserId, HashSet<UserId>>> {
        // the map stays consistent even if a holder panicked
        self.pairs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.guard().get(a).map_or(false, |peers| peers.contains(b))
    }

    /// Returns false when the pair was already linked (or is a self-pair).
    pub fn link(&self, a: &str, b: &str) -> bool {
        if a == b || a.is_empty() || b.is_empty() {
            return false;
        }
        let mut pairs = self.guard();
        let fresh = pairs.entry(a.to_string()).or_default().insert(b.to_string());
        pairs.entry(b.to_string()).or_default().insert(a.to_string());
        fresh
    }

    pub fn unlink(&self, a: &str, b: &str) {
        let mut pairs = self.guard();
        for (from, to) in [(a, b), (b, a)] {
            let now_empty = match pairs.get_mut(from) {
                Some(peers) => {
                    peers.remove(to);
                    peers.is_empty()
                }
                None => false,
            };
            if now_empty {
                pairs.remove(from);
            }
        }
    }

    /// Seeds pairings a client reports on connect. Returns how many were new.
    pub fn seed<'a, I>(&self, user_id: &str, peers: I) -> usize
    where
        I: IntoIterator<Item = &'a String>,
    {
        peers.into_iter().filter(|peer| self.link(user_id, peer)).count()
    }
}
