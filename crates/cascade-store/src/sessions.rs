use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use cascade_core::ids::SessionId;
use cascade_core::messages::ChatMessage;

use crate::error::StoreError;

/// A chat session and its accumulated transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub messages: Vec<ChatMessage>,
    pub created_at: String,
    pub last_active: String,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id,
            messages: Vec::new(),
            created_at: now.clone(),
            last_active: now,
        }
    }
}

/// In-memory session store. All operations clone out snapshots; callers
/// never hold a reference into the map across an await point.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session. When `id` is None a fresh id is minted.
    #[instrument(skip(self))]
    pub fn create(&self, id: Option<SessionId>) -> Result<Session, StoreError> {
        let id = id.unwrap_or_default();
        if self.sessions.contains_key(&id) {
            return Err(StoreError::Conflict(format!("session {id} already exists")));
        }
        let session = Session::new(id.clone());
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Get a snapshot of a session.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.sessions
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    pub fn exists(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Append a message to a session's transcript and bump last_active.
    #[instrument(skip(self, message), fields(session_id = %id))]
    pub fn append_message(
        &self,
        id: &SessionId,
        message: ChatMessage,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        entry.messages.push(message);
        entry.last_active = Utc::now().to_rfc3339();
        Ok(())
    }

    /// Snapshot the transcript in insertion order. Repeated calls with
    /// no intervening writes return identical content.
    pub fn history(&self, id: &SessionId) -> Result<Vec<ChatMessage>, StoreError> {
        self.sessions
            .get(id)
            .map(|entry| entry.messages.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    /// Bump last_active without touching the transcript.
    pub fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
        entry.last_active = Utc::now().to_rfc3339();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
