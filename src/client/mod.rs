//! External protocol client capability.
//!
//! The wire protocol, cryptographic pairing handshake and credential
//! encoding all live behind [`ProtocolClient`]. The orchestrator owns one
//! client per active session and only uses the operations below.

pub mod loopback;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::session::Session;

pub use loopback::{LoopbackClient, LoopbackConfig, LoopbackControl, LoopbackFactory};

/// Errors surfaced by a protocol client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Connection attempt failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Operation requires a live connection.
    #[error("client not connected")]
    NotConnected,

    /// Pairing could not be started or completed.
    #[error("pairing failed: {0}")]
    Pairing(String),

    /// Message delivery failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The client has been shut down.
    #[error("client closed")]
    Closed,

    /// Anything else reported by the protocol library.
    #[error("{0}")]
    Other(String),
}

/// Events on the pairing stream opened by [`ProtocolClient::pairing_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A new pairing code to display (QR payload).
    Code(String),
    /// Pairing finished; the client now holds credentials for `identity`.
    Success { identity: String },
    /// The remote end stopped issuing codes.
    Timeout,
    /// The pairing attempt failed.
    Error(String),
}

/// Connection lifecycle events published by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connection established and authenticated.
    Connected,
    /// Connection dropped cleanly; the client may reconnect on its own.
    Disconnected,
    /// Pairing completed on this connection.
    PairSuccess { identity: String },
    /// The remote end revoked the credentials.
    LoggedOut { reason: String },
    /// The client gave up connecting.
    ConnectFailure { reason: String },
}

impl ClientEvent {
    /// Events after which the client will not recover by itself.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientEvent::LoggedOut { .. } | ClientEvent::ConnectFailure { .. }
        )
    }
}

/// Per-session handle to the external protocol library.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the connection (and start pairing if no credentials exist).
    async fn connect(&self) -> Result<(), ClientError>;

    /// Close the connection. Never fails.
    async fn disconnect(&self);

    /// Revoke the credentials on the remote end.
    async fn logout(&self) -> Result<(), ClientError>;

    /// Open the pairing stream. Must be called before [`ProtocolClient::connect`].
    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError>;

    /// Request a linking code for phone-number pairing.
    async fn pair_phone(&self, phone_number: &str) -> Result<String, ClientError>;

    /// Send a text message, returning the message ID.
    async fn send_text(&self, to: &str, body: &str) -> Result<String, ClientError>;

    /// Subscribe to connection lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<ClientEvent>;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Identity held by the client once paired.
    fn external_identity(&self) -> Option<String>;
}

/// Builds clients for sessions, restoring credentials where they exist.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, session: &Session) -> Result<Arc<dyn ProtocolClient>, ClientError>;
}
