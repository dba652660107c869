//! Registry of live sessions
//!
//! The map's shard locks only guard its structure; each record carries its own
//! lock, so traffic on one session never contends with another. The metrics
//! counter is updated only after any map guard has been released.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::record::SessionRecord;
use crate::error::{Error, Result};
use crate::metrics::MetricsCounter;
use crate::models::message::ServerMessage;
use crate::models::{generate_id, SessionId, StateBlob};

/// Source of candidate session ids
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Attempts at finding an unused id before giving up
const MAX_ID_ATTEMPTS: usize = 4;

pub struct SessionDirectory {
    sessions: DashMap<SessionId, Arc<SessionRecord>>,
    metrics: Arc<MetricsCounter>,
    id_source: IdGenerator,
}

impl std::fmt::Debug for SessionDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDirectory")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SessionDirectory {
    #[must_use]
    pub fn new(metrics: Arc<MetricsCounter>) -> Self {
        Self::with_id_generator(metrics, Arc::new(generate_id))
    }

    #[must_use]
    pub fn with_id_generator(metrics: Arc<MetricsCounter>, id_source: IdGenerator) -> Self {
        Self {
            sessions: DashMap::new(),
            metrics,
            id_source,
        }
    }

    #[must_use]
    pub const fn metrics(&self) -> &Arc<MetricsCounter> {
        &self.metrics
    }

    /// Register a new session and return its id.
    pub fn create(&self, host_id: &str, initial_state: StateBlob) -> Result<SessionId> {
        if host_id.trim().is_empty() {
            return Err(Error::InvalidInput("Required parameter missing: hostId".to_string()));
        }
        if initial_state.is_empty() {
            return Err(Error::InvalidInput(
                "Required parameter missing: initialState".to_string(),
            ));
        }
        let state_frame = ServerMessage::game_state(&initial_state).map_err(|e| {
            Error::InvalidInput(format!("Initial state is not a JSON document: {e}"))
        })?;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = SessionId::from_string((self.id_source)());
            let inserted = match self.sessions.entry(id.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(SessionRecord::new(
                        id.clone(),
                        host_id.to_string(),
                        initial_state.clone(),
                        state_frame.clone(),
                    )));
                    true
                }
            };

            if inserted {
                self.metrics.session_created();
                info!(session_id = %id, host_id = %host_id, "Session created");
                return Ok(id);
            }
            debug!(session_id = %id, attempt, "Session id collision, retrying");
        }

        Err(Error::Internal("Failed to generate a unique session id".to_string()))
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<SessionRecord>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// Remove a session and close all of its connections.
    ///
    /// Returns false if no such session exists.
    pub fn remove(&self, session_id: &str) -> bool {
        let Some((_, record)) = self.sessions.remove(session_id) else {
            return false;
        };
        record.retire();
        self.metrics.sessions_removed(1);
        info!(session_id = %session_id, "Session removed");
        true
    }

    /// Remove a session only if `predicate` still holds under the map lock.
    ///
    /// The caller retires the record and accounts for the removal.
    pub(crate) fn evict_if(
        &self,
        session_id: &str,
        predicate: impl FnOnce(&SessionRecord) -> bool,
    ) -> Option<Arc<SessionRecord>> {
        self.sessions
            .remove_if(session_id, |_, record| predicate(record))
            .map(|(_, record)| record)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Every live record at the time of the call
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<SessionRecord>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
