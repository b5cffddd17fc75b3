//! In-memory session store with per-session locks, idle expiry and a size cap.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::traits::{SessionError, SessionGuard, SessionState, SessionStore};

struct Entry {
    generation: u64,
    cell: Arc<tokio::sync::Mutex<SessionState>>,
    last_seen: Instant,
}

/// Sessions live in a map behind a short-held `parking_lot` lock; each session
/// has its own async lock that is held across a whole request.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
    ttl: Duration,
    max_sessions: usize,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Find or insert the entry for `session_id` and return its lock.
    fn entry_cell(
        &self,
        session_id: &str,
    ) -> Result<Arc<tokio::sync::Mutex<SessionState>>, SessionError> {
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.last_seen = Instant::now();
            return Ok(entry.cell.clone());
        }

        if sessions.len() >= self.max_sessions {
            Self::purge_locked(&mut sessions, self.ttl);
        }
        if sessions.len() >= self.max_sessions && !Self::evict_oldest_idle(&mut sessions) {
            tracing::warn!(active = sessions.len(), "session store full, rejecting new session");
            return Err(SessionError::Full(sessions.len()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut state = SessionState::new(session_id);
        state.generation = generation;
        let cell = Arc::new(tokio::sync::Mutex::new(state));
        sessions.insert(
            session_id.to_string(),
            Entry {
                generation,
                cell: cell.clone(),
                last_seen: Instant::now(),
            },
        );
        tracing::debug!(session_id, generation, "session created");
        Ok(cell)
    }

    /// Remove idle expired entries. Busy entries are left for a later pass.
    fn purge_locked(sessions: &mut HashMap<String, Entry>, ttl: Duration) -> usize {
        let now = Instant::now();
        let before = sessions.len();
        sessions.retain(|_, entry| {
            if now.duration_since(entry.last_seen) < ttl {
                return true;
            }
            match entry.cell.try_lock() {
                Ok(mut state) => {
                    state.retired = true;
                    false
                }
                Err(_) => true,
            }
        });
        before - sessions.len()
    }

    /// Retire and remove the least recently active entry nobody holds.
    fn evict_oldest_idle(sessions: &mut HashMap<String, Entry>) -> bool {
        let mut oldest: Option<(&String, Instant, tokio::sync::MutexGuard<'_, SessionState>)> = None;
        for (id, entry) in sessions.iter() {
            if oldest
                .as_ref()
                .is_some_and(|(_, seen, _)| *seen <= entry.last_seen)
            {
                continue;
            }
            if let Ok(state) = entry.cell.try_lock() {
                oldest = Some((id, entry.last_seen, state));
            }
        }

        let victim = oldest.map(|(id, _, mut state)| {
            state.retired = true;
            id.clone()
        });
        match victim {
            Some(id) => {
                sessions.remove(&id);
                tracing::info!(session_id = %id, "evicted least recently active session");
                true
            }
            None => false,
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60), 10_000)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, session_id: &str) -> Result<SessionGuard, SessionError> {
        if session_id.trim().is_empty() {
            return Err(SessionError::EmptyId);
        }

        loop {
            let cell = self.entry_cell(session_id)?;
            let mut guard = cell.lock_owned().await;
            // Finished while we were queued; the map already points elsewhere.
            if guard.retired {
                continue;
            }
            guard.last_activity = Utc::now();
            return Ok(guard);
        }
    }

    async fn finish(&self, mut guard: SessionGuard) {
        guard.retired = true;
        let mut sessions = self.sessions.lock();
        let current = sessions
            .get(&guard.session_id)
            .is_some_and(|entry| entry.generation == guard.generation);
        if current {
            sessions.remove(&guard.session_id);
            tracing::debug!(session_id = %guard.session_id, "session finished");
        }
    }

    async fn clear(&self, session_id: &str) -> bool {
        let cell = self
            .sessions
            .lock()
            .get(session_id)
            .map(|entry| entry.cell.clone());
        let Some(cell) = cell else {
            return false;
        };

        let guard = cell.lock_owned().await;
        if guard.retired {
            return false;
        }
        self.finish(guard).await;
        true
    }

    async fn snapshot(&self, session_id: &str) -> Result<Option<SessionState>, SessionError> {
        let cell = self
            .sessions
            .lock()
            .get(session_id)
            .map(|entry| entry.cell.clone());
        let Some(cell) = cell else {
            return Ok(None);
        };
        let state = cell
            .try_lock()
            .map_err(|_| SessionError::Busy(session_id.to_string()))?;
        Ok((!state.retired).then(|| state.clone()))
    }

    async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let purged = Self::purge_locked(&mut sessions, self.ttl);
        if purged > 0 {
            tracing::info!(purged, remaining = sessions.len(), "expired sessions purged");
        }
        purged
    }

    fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
