//! In-process session store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::SessionStore;
use crate::error::GatewayError;
use crate::session::{Session, SessionId, SessionStatus};
use crate::Result;

/// Thread-safe, non-persistent storage for session rows.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows held.
    pub fn count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    fn modify<F>(&self, id: &SessionId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| GatewayError::LockPoisoned)?;

        let session = sessions
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;

        f(session);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| GatewayError::LockPoisoned)?;

        if sessions.values().any(|s| s.name == session.name) {
            return Err(GatewayError::AlreadyExists(session.name.clone()));
        }
        if sessions.contains_key(&session.id) {
            return Err(GatewayError::AlreadyExists(session.id.to_string()));
        }

        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &SessionId) -> Result<Session> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| GatewayError::LockPoisoned)?;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    async fn get_by_name(&self, name: &str) -> Result<Session> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| GatewayError::LockPoisoned)?;
        sessions
            .values()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| GatewayError::LockPoisoned)?;
        let mut all: Vec<Session> = sessions.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let mut updated = session.clone();
        updated.touch();
        self.modify(&session.id, move |s| *s = updated)
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| GatewayError::LockPoisoned)?;
        sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    async fn set_status(&self, id: &SessionId, status: SessionStatus) -> Result<()> {
        self.modify(id, |s| s.apply_status(status))
    }

    async fn set_external_identity(&self, id: &SessionId, identity: &str) -> Result<()> {
        self.modify(id, |s| {
            s.external_identity = identity.to_string();
            s.touch();
        })
    }

    async fn set_pairing_payload(&self, id: &SessionId, payload: &str) -> Result<()> {
        self.modify(id, |s| {
            s.pairing_payload = payload.to_string();
            s.touch();
        })
    }

    async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.status == status)
            .collect())
    }
}
