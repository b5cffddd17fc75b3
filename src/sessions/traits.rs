//! Session storage traits and types for in-progress bookings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::booking::{BookingSlots, Step};

/// One user's in-progress booking conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub step: Step,
    pub slots: BookingSlots,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Identifies the store entry this state belongs to.
    #[serde(skip)]
    pub(crate) generation: u64,
    /// Set once the entry has been removed; waiters must not reuse it.
    #[serde(skip)]
    pub(crate) retired: bool,
}

impl SessionState {
    /// A brand-new session: step 0, every slot empty.
    pub fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            step: Step::Greeting,
            slots: BookingSlots::default(),
            created_at: now,
            last_activity: now,
            generation: 0,
            retired: false,
        }
    }
}

/// Exclusive, locked access to one session for the span of a request.
pub type SessionGuard = OwnedMutexGuard<SessionState>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session id must not be empty")]
    EmptyId,
    #[error("session store is full ({0} active sessions)")]
    Full(usize),
    #[error("session '{0}' is busy with another request")]
    Busy(String),
}

/// Process-wide store of in-progress sessions.
///
/// Access is per-key atomic: a [`SessionGuard`] excludes every other request
/// for the same session id until it is dropped or passed to [`SessionStore::finish`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Lock the session, creating it at step 0 if it does not exist.
    async fn get_or_create(&self, session_id: &str) -> Result<SessionGuard, SessionError>;

    /// Remove the locked session. Requests queued on it start a fresh one.
    async fn finish(&self, guard: SessionGuard);

    /// Remove a session by id. Returns whether one existed.
    async fn clear(&self, session_id: &str) -> bool;

    /// Copy of the current state, if the session exists. Never waits on an
    /// in-flight request; a locked session is [`SessionError::Busy`].
    async fn snapshot(&self, session_id: &str) -> Result<Option<SessionState>, SessionError>;

    /// Drop sessions idle past the TTL. Returns how many were removed.
    async fn purge_expired(&self) -> usize;

    /// Number of live sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}
