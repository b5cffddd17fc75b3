//! Session management: tracks each user's in-progress booking conversation.

pub mod in_memory;
pub mod traits;

pub use in_memory::InMemorySessionStore;
pub use traits::{SessionError, SessionGuard, SessionState, SessionStore};

use crate::config::SessionsConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create the in-memory session store with the configured bounds.
pub fn create_session_store(config: &SessionsConfig) -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new(
        Duration::from_secs(config.ttl_secs),
        config.max_sessions,
    ))
}
