//! Session lifecycle status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Connection status of a session, shared by the worker and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No connection; initial and terminal-idle state.
    #[default]
    Disconnected,
    /// Connecting or waiting for pairing.
    Connecting,
    /// Connected to the external endpoint.
    Connected,
    /// Unrecoverable failure; left only by restarting the session.
    Error,
}

impl SessionStatus {
    /// Check if transition to target status is valid.
    ///
    /// Valid transitions:
    /// - Disconnected -> Connecting (start)
    /// - Connecting -> Connected | Error | Disconnected
    /// - Connected -> Disconnected | Error
    /// - Disconnected -> Connected | Error (client reconnects on its own)
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (*self, target),
            (Disconnected, Connecting)
                | (Disconnected, Connected)
                | (Disconnected, Error)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Error)
        )
    }

    /// Check if a worker in this status should be left alone by a new start.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Connected)
    }

    /// Stable lowercase name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disconnected" => Ok(SessionStatus::Disconnected),
            "connecting" => Ok(SessionStatus::Connecting),
            "connected" => Ok(SessionStatus::Connected),
            "error" => Ok(SessionStatus::Error),
            other => Err(GatewayError::Validation(format!(
                "invalid session status: {other}"
            ))),
        }
    }
}
