//! The durable session record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{SessionId, SessionStatus};
use crate::error::GatewayError;
use crate::Result;

/// Longest session name accepted.
pub const MAX_NAME_LEN: usize = 255;

/// Validate and normalize a session name.
///
/// Returns the trimmed name.
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GatewayError::Validation(
            "invalid session name: name cannot be empty".into(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(GatewayError::Validation(format!(
            "invalid session name: name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// A session row as kept by the durable store.
///
/// `external_identity` is empty until the session has been paired and
/// `pairing_payload` is empty unless a pairing flow is in progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub status: SessionStatus,
    pub external_identity: String,
    pub pairing_payload: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new, unpaired session with a validated name.
    pub fn new(name: &str) -> Result<Self> {
        let name = validate_name(name)?;
        let now = Utc::now();
        Ok(Self {
            id: SessionId::new(),
            name,
            status: SessionStatus::Disconnected,
            external_identity: String::new(),
            pairing_payload: String::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
            last_connected_at: None,
        })
    }

    /// Whether the session has durable credentials to reconnect with.
    pub fn is_paired(&self) -> bool {
        !self.external_identity.is_empty()
    }

    /// Whether a pairing payload is currently recorded.
    pub fn has_pairing_payload(&self) -> bool {
        !self.pairing_payload.is_empty()
    }

    /// Update the last-modified timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Apply a status change, stamping `last_connected_at` on connect.
    pub fn apply_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.touch();
        if status == SessionStatus::Connected {
            self.last_connected_at = Some(self.updated_at);
        }
    }

    /// Forget credentials and any pending pairing payload.
    pub fn clear_authentication(&mut self) {
        self.external_identity.clear();
        self.pairing_payload.clear();
        self.touch();
    }
}
