//! API layer for pairgate.
//!
//! REST endpoints over [`SessionManager`](crate::orchestrator::SessionManager).
//!
//! ## Endpoints
//!
//! ### Health & Info
//! - `GET /health` - Health check (never authenticated)
//! - `GET /api/v1` - API information
//!
//! ### Sessions
//! - `GET /api/v1/sessions` - List all sessions
//! - `POST /api/v1/sessions` - Create a new session
//! - `GET /api/v1/sessions/{id}` - Get a session
//! - `DELETE /api/v1/sessions/{id}` - Delete a session
//! - `POST /api/v1/sessions/{id}/connect` - Start the session's worker
//! - `POST /api/v1/sessions/{id}/disconnect` - Stop the session's worker
//! - `POST /api/v1/sessions/{id}/logout` - Log out and forget credentials
//! - `GET /api/v1/sessions/{id}/qr` - Current pairing code
//! - `POST /api/v1/sessions/{id}/pairphone` - Linking code for phone pairing
//! - `POST /api/v1/sessions/{id}/messages/text` - Send a text message
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pairgate::api::{serve, AppState, ServerConfig};
//! use pairgate::{LoopbackFactory, MemorySessionStore, OrchestratorConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> pairgate::Result<()> {
//!     let manager = Arc::new(SessionManager::new(
//!         Arc::new(MemorySessionStore::new()),
//!         Arc::new(LoopbackFactory::default()),
//!         OrchestratorConfig::default(),
//!     ));
//!     let config = ServerConfig::new("127.0.0.1", 8080);
//!     serve(config, AppState::new(manager), std::future::pending()).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;

// Re-export commonly used types
pub use handlers::AppState;
pub use router::{create_router, create_router_with_auth, serve, ServerConfig};
pub use types::{
    api_error, ApiError, CreateSessionRequest, ErrorResponse, ListSessionsResponse,
    PairPhoneRequest, PairPhoneResponse, PairingArtifactResponse, SendTextRequest,
    SendTextResponse, SessionResponse, SessionStatusResponse,
};
