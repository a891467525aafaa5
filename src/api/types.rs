//! API request and response types.

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::orchestrator::{PairingArtifact, WorkerInfo};
use crate::session::{Session, SessionId, SessionStatus};

/// Error half of every handler result.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Request to create a new session.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    /// Unique display name.
    pub name: String,
}

/// A session as seen through the API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: SessionId,
    pub name: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_identity: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Live worker details, when one is registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerInfo>,
}

impl SessionResponse {
    pub fn from_session(session: Session) -> Self {
        Self {
            external_identity: session.is_paired().then(|| session.external_identity.clone()),
            id: session.id,
            name: session.name,
            status: session.status,
            is_active: session.is_active,
            created_at: session.created_at,
            updated_at: session.updated_at,
            last_connected_at: session.last_connected_at,
            worker: None,
        }
    }

    pub fn with_worker(mut self, worker: Option<WorkerInfo>) -> Self {
        self.worker = worker;
        self
    }
}

/// List sessions response.
#[derive(Debug, Clone, Serialize)]
pub struct ListSessionsResponse {
    /// Total number of sessions.
    pub count: usize,
    /// Sessions with a registered worker.
    pub active: usize,
    /// Sessions whose worker is connected.
    pub connected: usize,
    pub sessions: Vec<SessionResponse>,
}

/// Status after a lifecycle command.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub message: String,
}

impl SessionStatusResponse {
    pub fn new(session_id: SessionId, status: SessionStatus, message: impl Into<String>) -> Self {
        Self {
            session_id,
            status,
            message: message.into(),
        }
    }
}

/// Pairing code to render as a QR image.
#[derive(Debug, Clone, Serialize)]
pub struct PairingArtifactResponse {
    pub session_id: SessionId,
    pub payload: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PairingArtifactResponse {
    pub fn new(session_id: SessionId, artifact: PairingArtifact) -> Self {
        Self {
            session_id,
            payload: artifact.payload,
            issued_at: artifact.issued_at,
            expires_at: artifact.expires_at,
        }
    }
}

/// Request to pair by phone number.
#[derive(Debug, Clone, Deserialize)]
pub struct PairPhoneRequest {
    pub phone_number: String,
}

/// Linking code to type on the phone.
#[derive(Debug, Clone, Serialize)]
pub struct PairPhoneResponse {
    pub session_id: SessionId,
    pub linking_code: String,
}

/// Request to send a text message.
#[derive(Debug, Clone, Deserialize)]
pub struct SendTextRequest {
    /// Phone number or full address of the recipient.
    pub to: String,
    pub body: String,
}

/// Result of sending a message.
#[derive(Debug, Clone, Serialize)]
pub struct SendTextResponse {
    pub session_id: SessionId,
    pub message_id: String,
    pub sent_at: DateTime<Utc>,
}

/// Generic API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "SESSION_NOT_FOUND").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new("SESSION_NOT_FOUND", format!("Session '{}' not found", id))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }
}

/// HTTP status and error code for a gateway error.
pub fn status_for(error: &GatewayError) -> (StatusCode, &'static str) {
    match error {
        GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
        GatewayError::AlreadyConnected(_) => (StatusCode::CONFLICT, "ALREADY_CONNECTED"),
        GatewayError::AlreadyExists(_) => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
        GatewayError::NotConnected(_) => (StatusCode::CONFLICT, "NOT_CONNECTED"),
        GatewayError::CapacityExceeded { .. } => {
            (StatusCode::TOO_MANY_REQUESTS, "CAPACITY_EXCEEDED")
        }
        GatewayError::PairingTimeout => (StatusCode::REQUEST_TIMEOUT, "PAIRING_TIMEOUT"),
        GatewayError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        GatewayError::ExternalFailure(_) => (StatusCode::BAD_GATEWAY, "EXTERNAL_FAILURE"),
        GatewayError::Store(_) | GatewayError::LockPoisoned | GatewayError::Io(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    }
}

impl From<GatewayError> for ErrorResponse {
    fn from(error: GatewayError) -> Self {
        let (_, code) = status_for(&error);
        Self::new(code, error.to_string())
    }
}

/// Convert a gateway error into a handler error.
pub fn api_error(error: GatewayError) -> ApiError {
    let (status, _) = status_for(&error);
    if status.is_server_error() {
        tracing::warn!(error = %error, "request failed");
    }
    (status, Json(ErrorResponse::from(error)))
}
