//! Best-effort mirroring of worker status into the durable store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::session::{SessionId, SessionStatus};
use crate::store::SessionStore;
use crate::Result;

/// Writes status transitions to the store without blocking the caller.
///
/// Every write carries a sequence number. Writes for one session are
/// serialized, and each field (status, identity) is only overwritten by a
/// newer write of that field. A slow write can never overwrite a newer
/// status, but an identity it carries still lands if nothing newer set one.
pub struct StatusSynchronizer {
    store: Arc<dyn SessionStore>,
    write_timeout: Duration,
    sequence: AtomicU64,
    slots: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<Applied>>>>,
}

/// Sequence of the last write applied to each field of one row.
#[derive(Debug, Default)]
struct Applied {
    status: u64,
    identity: u64,
}

/// Outcome of a single durable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// Only the identity was written; the status was older than the row's.
    IdentityOnly,
    Stale,
}

impl StatusSynchronizer {
    pub fn new(store: Arc<dyn SessionStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            write_timeout,
            sequence: AtomicU64::new(0),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a bounded write of `status` (and `identity`, if given).
    ///
    /// Failures are logged and dropped.
    pub fn publish(
        self: &Arc<Self>,
        session_id: &SessionId,
        status: SessionStatus,
        identity: Option<String>,
    ) -> JoinHandle<()> {
        let seq = self.next_sequence();
        let this = Arc::clone(self);
        let session_id = session_id.clone();

        tokio::spawn(async move {
            match this
                .write_bounded(seq, &session_id, status, identity.as_deref())
                .await
            {
                Ok(WriteOutcome::Applied) => {
                    debug!(session_id = %session_id, status = %status, seq, "status persisted");
                }
                Ok(WriteOutcome::IdentityOnly) => {
                    debug!(session_id = %session_id, status = %status, seq, "identity persisted, status stale");
                }
                Ok(WriteOutcome::Stale) => {
                    debug!(session_id = %session_id, status = %status, seq, "skipped stale status write");
                }
                Err(e) => {
                    warn!(session_id = %session_id, status = %status, error = %e, "failed to persist status");
                }
            }
        })
    }

    /// Reset the row to an unauthenticated, disconnected state.
    ///
    /// Ordered after every write published before it.
    pub async fn clear_authentication(&self, session_id: &SessionId) -> Result<()> {
        let seq = self.next_sequence();
        let slot = self.slot(session_id)?;
        let mut applied = slot.lock().await;

        let write = async {
            self.store
                .set_status(session_id, SessionStatus::Disconnected)
                .await?;
            self.store.set_external_identity(session_id, "").await?;
            self.store.set_pairing_payload(session_id, "").await
        };
        let result = tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| GatewayError::Store("status write timed out".into()))?;
        applied.status = seq;
        applied.identity = seq;
        result
    }

    /// Drop the ordering state for a deleted session.
    pub fn forget(&self, session_id: &SessionId) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.remove(session_id);
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn slot(&self, session_id: &SessionId) -> Result<Arc<tokio::sync::Mutex<Applied>>> {
        let mut slots = self.slots.lock().map_err(|_| GatewayError::LockPoisoned)?;
        Ok(Arc::clone(slots.entry(session_id.clone()).or_default()))
    }

    async fn write_bounded(
        &self,
        seq: u64,
        session_id: &SessionId,
        status: SessionStatus,
        identity: Option<&str>,
    ) -> Result<WriteOutcome> {
        tokio::time::timeout(
            self.write_timeout,
            self.write(seq, session_id, status, identity),
        )
        .await
        .map_err(|_| GatewayError::Store("status write timed out".into()))?
    }

    async fn write(
        &self,
        seq: u64,
        session_id: &SessionId,
        status: SessionStatus,
        identity: Option<&str>,
    ) -> Result<WriteOutcome> {
        let slot = self.slot(session_id)?;
        let mut applied = slot.lock().await;

        let status_fresh = seq > applied.status;
        let identity = identity.filter(|_| seq > applied.identity);

        if status_fresh {
            self.store.set_status(session_id, status).await?;
            applied.status = seq;
        }
        if let Some(identity) = identity {
            self.store.set_external_identity(session_id, identity).await?;
            applied.identity = seq;
        }

        Ok(match (status_fresh, identity.is_some()) {
            (true, _) => WriteOutcome::Applied,
            (false, true) => WriteOutcome::IdentityOnly,
            (false, false) => WriteOutcome::Stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::store::MemorySessionStore;

    async fn setup() -> (Arc<MemorySessionStore>, Arc<StatusSynchronizer>, SessionId) {
        let store = Arc::new(MemorySessionStore::new());
        let session = Session::new("alice").unwrap();
        store.create(&session).await.unwrap();
        let sync = Arc::new(StatusSynchronizer::new(
            store.clone(),
            Duration::from_secs(1),
        ));
        (store, sync, session.id)
    }

    #[tokio::test]
    async fn test_publish_writes_status_and_identity() {
        let (store, sync, id) = setup().await;

        sync.publish(&id, SessionStatus::Connected, Some("1234@ext".into()))
            .await
            .unwrap();

        let row = store.get_by_id(&id).await.unwrap();
        assert_eq!(row.status, SessionStatus::Connected);
        assert_eq!(row.external_identity, "1234@ext");
        assert!(row.last_connected_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_write_is_skipped() {
        let (store, sync, id) = setup().await;

        let older = sync.next_sequence();
        let newer = sync.next_sequence();
        assert_eq!(
            sync.write(newer, &id, SessionStatus::Error, None).await.unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(
            sync.write(older, &id, SessionStatus::Connected, None)
                .await
                .unwrap(),
            WriteOutcome::Stale
        );

        let row = store.get_by_id(&id).await.unwrap();
        assert_eq!(row.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn test_identity_survives_stale_status() {
        let (store, sync, id) = setup().await;

        let connected = sync.next_sequence();
        let dropped = sync.next_sequence();
        assert_eq!(
            sync.write(dropped, &id, SessionStatus::Disconnected, None)
                .await
                .unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(
            sync.write(connected, &id, SessionStatus::Connected, Some("1234@ext"))
                .await
                .unwrap(),
            WriteOutcome::IdentityOnly
        );

        let row = store.get_by_id(&id).await.unwrap();
        assert_eq!(row.status, SessionStatus::Disconnected);
        assert_eq!(row.external_identity, "1234@ext");
    }

    #[tokio::test]
    async fn test_older_identity_does_not_undo_newer_one() {
        let (store, sync, id) = setup().await;

        let paired = sync.next_sequence();
        let logged_out = sync.next_sequence();
        sync.write(logged_out, &id, SessionStatus::Error, Some(""))
            .await
            .unwrap();
        assert_eq!(
            sync.write(paired, &id, SessionStatus::Connected, Some("1234@ext"))
                .await
                .unwrap(),
            WriteOutcome::Stale
        );

        let row = store.get_by_id(&id).await.unwrap();
        assert_eq!(row.status, SessionStatus::Error);
        assert!(row.external_identity.is_empty());
    }

    #[tokio::test]
    async fn test_clear_authentication_wins_over_older_writes() {
        let (store, sync, id) = setup().await;

        let paired = sync.next_sequence();
        sync.clear_authentication(&id).await.unwrap();
        assert_eq!(
            sync.write(paired, &id, SessionStatus::Connected, Some("1@ext"))
                .await
                .unwrap(),
            WriteOutcome::Stale
        );

        let row = store.get_by_id(&id).await.unwrap();
        assert_eq!(row.status, SessionStatus::Disconnected);
        assert!(row.external_identity.is_empty());
    }

    #[tokio::test]
    async fn test_missing_row_is_logged_not_fatal() {
        let (_store, sync, _id) = setup().await;
        let ghost = SessionId::from_raw("ghost");

        // The spawned task must finish cleanly even though the write fails.
        sync.publish(&ghost, SessionStatus::Connected, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_authentication() {
        let (store, sync, id) = setup().await;
        sync.publish(&id, SessionStatus::Connected, Some("1@ext".into()))
            .await
            .unwrap();
        store.set_pairing_payload(&id, "stale").await.unwrap();

        sync.clear_authentication(&id).await.unwrap();

        let row = store.get_by_id(&id).await.unwrap();
        assert_eq!(row.status, SessionStatus::Disconnected);
        assert!(row.external_identity.is_empty());
        assert!(row.pairing_payload.is_empty());
    }
}
