//! Session memory — bounded FIFO of finished exchanges per session
//!
//! Exchanges are appended only after the loop has produced a final result,
//! so a snapshot taken before a run never contains that run's own question.

use std::collections::{HashMap, VecDeque};

use epsilon_core::models::Exchange;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SessionMemory {
    capacity: usize,
    exchanges: VecDeque<Exchange>,
}

impl SessionMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            exchanges: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    /// Append, evicting the oldest exchanges once over capacity.
    pub fn push(&mut self, exchange: Exchange) {
        if self.capacity == 0 {
            return;
        }
        self.exchanges.push_back(exchange);
        while self.exchanges.len() > self.capacity {
            self.exchanges.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    pub fn snapshot(&self) -> Vec<Exchange> {
        self.exchanges.iter().cloned().collect()
    }
}

struct Entry {
    memory: SessionMemory,
    last_used: u64,
}

#[derive(Default)]
struct Sessions {
    clock: u64,
    entries: HashMap<String, Entry>,
}

impl Sessions {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Memories keyed by session id. Sessions are created on first append; once
/// `max_sessions` are held, creating another evicts the least recently used.
pub struct SessionStore {
    capacity: usize,
    max_sessions: usize,
    sessions: Mutex<Sessions>,
}

impl SessionStore {
    pub fn new(capacity: usize, max_sessions: usize) -> Self {
        Self {
            capacity,
            max_sessions: max_sessions.max(1),
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Current exchanges for `session_id`, oldest first. Unknown sessions are empty.
    pub async fn snapshot(&self, session_id: &str) -> Vec<Exchange> {
        let mut sessions = self.sessions.lock().await;
        let now = sessions.tick();
        match sessions.entries.get_mut(session_id) {
            Some(entry) => {
                entry.last_used = now;
                entry.memory.snapshot()
            }
            None => Vec::new(),
        }
    }

    /// Returns the session's length after the append.
    pub async fn append(&self, session_id: &str, exchange: Exchange) -> usize {
        let mut sessions = self.sessions.lock().await;
        let now = sessions.tick();

        if !sessions.entries.contains_key(session_id) {
            while sessions.entries.len() >= self.max_sessions {
                let oldest = sessions
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(id, _)| id.clone());
                match oldest {
                    Some(id) => {
                        sessions.entries.remove(&id);
                        tracing::debug!(session = %id, "Evicted least recently used session");
                    }
                    None => break,
                }
            }
        }

        let capacity = self.capacity;
        let entry = sessions
            .entries
            .entry(session_id.to_string())
            .or_insert_with(|| Entry {
                memory: SessionMemory::new(capacity),
                last_used: now,
            });
        entry.last_used = now;
        entry.memory.push(exchange);
        entry.memory.len()
    }

    pub async fn exists(&self, session_id: &str) -> bool {
        self.sessions.lock().await.entries.contains_key(session_id)
    }

    /// Drop the session. Returns whether it existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        self.sessions.lock().await.entries.remove(session_id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.entries.len()
    }
}
