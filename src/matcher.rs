// src/matcher.rs
use crate::chat_index::ExistingChatIndex;
use crate::types::{PreferenceSet, UserId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// A user's active, unmatched entry in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSeeker {
    pub user_id: UserId,
    pub prefs: PreferenceSet,
    // enqueue order; lower is older
    seq: u64,
}

/// Two seekers taken out of the pool together, waiting for their room.
#[derive(Debug, Clone)]
pub struct Pairing {
    /// The user whose submission found the match.
    pub caller: PendingSeeker,
    /// The seeker that was waiting in the pool.
    pub peer: PendingSeeker,
    // caller's seq at match time; marks both users as owned by this pairing
    token: u64,
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Queued,
    Matched(Pairing),
}

#[derive(Default)]
struct Pool {
    seekers: VecDeque<PendingSeeker>,
    // users whose pairing is being persisted right now -> that pairing's token
    in_flight: HashMap<UserId, u64>,
    next_seq: u64,
}

impl Pool {
    fn take(&mut self, user_id: &str) -> Option<PendingSeeker> {
        let pos = self.seekers.iter().position(|s| s.user_id == user_id)?;
        self.seekers.remove(pos)
    }

    /// Clears the user's in-flight mark only if it still belongs to `token`.
    fn release(&mut self, user_id: &str, token: u64) -> bool {
        if self.in_flight.get(user_id) == Some(&token) {
            self.in_flight.remove(user_id);
            true
        } else {
            false
        }
    }

    fn issue_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// The pool of users currently seeking a pairing, scanned oldest-first.
///
/// Scan, removal of the matched seeker and the pair reservation in the
/// [`ExistingChatIndex`] all happen under the pool lock, so two concurrent
/// submissions can never take the same waiting seeker.
pub struct PreferenceMatcher {
    pool: Mutex<Pool>,
    index: Arc<ExistingChatIndex>,
}

impl PreferenceMatcher {
    pub fn new(index: Arc<ExistingChatIndex>) -> Self {
        Self {
            pool: Mutex::new(Pool::default()),
            index,
        }
    }

    fn guard(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn submit(&self, user_id: &str, prefs: PreferenceSet) -> SubmitOutcome {
        let mut pool = self.guard();

        // 1. resubmission replaces whatever this user had before
        if pool.take(user_id).is_some() {
            debug!("♻️ [MATCHER] {} resubmitted, prior entry dropped", user_id);
        }
        pool.in_flight.remove(user_id);

        // 2. oldest compatible seeker that is not already paired with the caller
        let hit = pool.seekers.iter().position(|candidate| {
            candidate.user_id != user_id
                && candidate.prefs.intersects(&prefs)
                && !self.index.contains(user_id, &candidate.user_id)
        });

        let seq = pool.issue_seq();
        let caller = PendingSeeker {
            user_id: user_id.to_string(),
            prefs,
            seq,
        };

        match hit.and_then(|pos| pool.seekers.remove(pos)) {
            Some(peer) => {
                // reserve the pair now; undone by `abandon` if the room never materializes
                self.index.link(&caller.user_id, &peer.user_id);
                pool.in_flight.insert(caller.user_id.clone(), seq);
                pool.in_flight.insert(peer.user_id.clone(), seq);
                info!("🤝 [MATCHER] {} <-> {} matched", caller.user_id, peer.user_id);
                SubmitOutcome::Matched(Pairing {
                    caller,
                    peer,
                    token: seq,
                })
            }
            None => {
                info!("⏳ [MATCHER] {} queued with {} tags", caller.user_id, caller.prefs.len());
                pool.seekers.push_back(caller);
                SubmitOutcome::Queued
            }
        }
    }

    /// Withdraws the user from the pool. Also voids any restore for a pairing
    /// still in flight. Returns whether a pool entry existed.
    pub fn cancel(&self, user_id: &str) -> bool {
        let mut pool = self.guard();
        pool.in_flight.remove(user_id);
        let removed = pool.take(user_id).is_some();
        if removed {
            info!("🚪 [MATCHER] {} withdrew from the pool", user_id);
        }
        removed
    }

    /// The room for this pairing exists; its members are no longer in flight.
    /// A member already claimed by a newer pairing keeps that claim.
    pub fn complete(&self, pairing: &Pairing) {
        let mut pool = self.guard();
        pool.release(&pairing.caller.user_id, pairing.token);
        pool.release(&pairing.peer.user_id, pairing.token);
    }

    /// Rolls back a pairing whose room could not be persisted: the reservation is
    /// released and each side still in flight goes back into the pool. The peer
    /// regains its old FIFO position. Returns the users that were restored.
    pub fn abandon(&self, pairing: Pairing) -> Vec<UserId> {
        let mut pool = self.guard();
        self.index.unlink(&pairing.caller.user_id, &pairing.peer.user_id);

        let mut restored = Vec::new();
        let token = pairing.token;
        for seeker in [pairing.peer, pairing.caller] {
            // cancelled, disconnected, resubmitted or paired again since: leave it alone
            if !pool.release(&seeker.user_id, token) {
                continue;
            }
            if pool.seekers.iter().any(|s| s.user_id == seeker.user_id) {
                continue;
            }
            let pos = pool
                .seekers
                .iter()
                .position(|s| s.seq > seeker.seq)
                .unwrap_or(pool.seekers.len());
            restored.push(seeker.user_id.clone());
            pool.seekers.insert(pos, seeker);
        }
        restored
    }

    #[cfg(test)]
    pub fn is_seeking(&self, user_id: &str) -> bool {
        self.guard().seekers.iter().any(|s| s.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.guard().seekers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pool order, oldest first.
    #[cfg(test)]
    pub fn waiting(&self) -> Vec<UserId> {
        self.guard().seekers.iter().map(|s| s.user_id.clone()).collect()
    }
}
