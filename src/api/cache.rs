use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::service::TransactionPage;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    user_id: String,
    query: String,
}

struct CacheEntry {
    stored_at: Instant,
    page: TransactionPage,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Bumped on every invalidation of the user.
    generations: HashMap<String, u64>,
}

/// Listing results per (user, normalized query), valid for `ttl`.
///
/// Writers call [`TransactionCache::invalidate_user`] after every successful
/// change. Readers take [`TransactionCache::generation`] before querying the
/// ledger; a page read before an invalidation is never stored.
pub struct TransactionCache {
    ttl: Duration,
    state: Mutex<CacheState>,
}

impl TransactionCache {
    pub fn new(ttl: Duration) -> TransactionCache {
        TransactionCache {
            ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn generation(&self, user_id: &str) -> u64 {
        self.state
            .lock()
            .generations
            .get(user_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn get(&self, user_id: &str, query: &str) -> Option<TransactionPage> {
        let key = CacheKey {
            user_id: user_id.to_string(),
            query: query.to_string(),
        };
        let mut state = self.state.lock();
        match state.entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.page.clone()),
            Some(_) => {
                state.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Stores `page` unless the user was invalidated since `generation`.
    pub fn insert(&self, user_id: &str, query: &str, generation: u64, page: TransactionPage) {
        if self.ttl.is_zero() {
            return;
        }
        let mut state = self.state.lock();
        if state.generations.get(user_id).copied().unwrap_or_default() != generation {
            return;
        }
        let ttl = self.ttl;
        state.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        state.entries.insert(
            CacheKey {
                user_id: user_id.to_string(),
                query: query.to_string(),
            },
            CacheEntry {
                stored_at: Instant::now(),
                page,
            },
        );
    }

    pub fn invalidate_user(&self, user_id: &str) {
        let mut state = self.state.lock();
        *state.generations.entry(user_id.to_string()).or_default() += 1;
        state.entries.retain(|key, _| key.user_id != user_id);
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
