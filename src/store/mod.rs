//! Durable session store.
//!
//! The orchestrator only talks to storage through [`SessionStore`]. Every
//! statement is scoped to a single session ID, so concurrent workers need no
//! locking beyond what each backend does per row.
//!
//! Two backends ship with the crate:
//!
//! - [`MemorySessionStore`]: process-local map, used by tests and `--memory-store`
//! - [`SqliteSessionStore`]: sqlx-backed SQLite table

mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::session::{Session, SessionId, SessionStatus};
use crate::Result;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

/// CRUD plus targeted field updates over session rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new row. Fails with `AlreadyExists` if the name is taken.
    async fn create(&self, session: &Session) -> Result<()>;

    /// Fetch a row by ID, or `NotFound`.
    async fn get_by_id(&self, id: &SessionId) -> Result<Session>;

    /// Fetch a row by its unique name, or `NotFound`.
    async fn get_by_name(&self, name: &str) -> Result<Session>;

    /// All rows, oldest first.
    async fn list(&self) -> Result<Vec<Session>>;

    /// Replace a full row, or `NotFound`.
    async fn update(&self, session: &Session) -> Result<()>;

    /// Remove a row, or `NotFound`.
    async fn delete(&self, id: &SessionId) -> Result<()>;

    /// Set the status; `connected` also stamps the last-connected time.
    async fn set_status(&self, id: &SessionId, status: SessionStatus) -> Result<()>;

    /// Set the external identity (empty clears it).
    async fn set_external_identity(&self, id: &SessionId, identity: &str) -> Result<()>;

    /// Set the pending pairing payload (empty clears it).
    async fn set_pairing_payload(&self, id: &SessionId, payload: &str) -> Result<()>;

    /// Rows whose last persisted status equals `status`.
    async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<Session>>;
}
