//! # pairgate
//!
//! Gateway for long-lived, paired connections to an external chat endpoint.
//!
//! Operators create named sessions. Each session owns one authenticated
//! connection which must be paired once, by scanning a code or entering a
//! linking code on a second device, and afterwards reconnects silently
//! from stored credentials.
//!
//! ## Features
//!
//! - **Orchestrator**: one supervised worker per session, bounded by a
//!   configurable capacity
//! - **Pairing**: codes are cached and persisted so concurrent readers see
//!   the same value
//! - **Durable status**: every transition is mirrored into a session store
//!   (in-memory or SQLite)
//! - **Resume**: sessions connected before a restart reconnect on startup
//! - **REST API**: axum router with API-key authentication
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pairgate::{LoopbackFactory, MemorySessionStore, OrchestratorConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> pairgate::Result<()> {
//!     pairgate::logging::try_init().ok();
//!
//!     let manager = SessionManager::new(
//!         Arc::new(MemorySessionStore::new()),
//!         Arc::new(LoopbackFactory::default()),
//!         OrchestratorConfig::default(),
//!     );
//!
//!     let session = manager.create_session("alice").await?;
//!     manager.start_session(&session.id).await?;
//!
//!     let artifact = manager.pairing_artifact(&session.id).await?;
//!     println!("scan this: {}", artifact.payload);
//!
//!     manager.shutdown().await
//! }
//! ```

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod security;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use client::{
    ClientError, ClientEvent, ClientFactory, LoopbackConfig, LoopbackFactory, PairingEvent,
    ProtocolClient,
};
pub use error::{GatewayError, Result};
pub use orchestrator::{OrchestratorConfig, PairingArtifact, SessionManager, WorkerInfo};
pub use session::{Session, SessionId, SessionStatus};
pub use store::{MemorySessionStore, SessionStore, SqliteSessionStore};
