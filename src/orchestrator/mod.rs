//! Multi-session connection orchestrator.
//!
//! [`SessionManager`] is the only entry point: session CRUD, start and stop,
//! pairing, and messaging all go through it. Internally it owns a
//! [`Registry`] of [`Worker`]s and a [`StatusSynchronizer`] that mirrors
//! their status into the [`SessionStore`].

pub mod pairing;
pub mod registry;
pub mod resume;
pub mod sync;
pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

pub use pairing::{PairingArtifact, PairingSettings};
pub use registry::{Registration, Registry};
pub use resume::{resume_sessions, spawn_resumer, ResumeConfig, ResumeReport, SessionStarter};
pub use sync::StatusSynchronizer;
pub use worker::{Worker, WorkerContext};

use crate::client::ClientFactory;
use crate::error::GatewayError;
use crate::session::{Session, SessionId, SessionStatus};
use crate::store::SessionStore;
use crate::Result;

/// Runtime knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_sessions: usize,
    /// How long a pairing artifact request waits for a code.
    pub pairing_artifact_timeout: Duration,
    /// How long an issued code is served from cache.
    pub pairing_artifact_validity: Duration,
    /// Upper bound on a whole pairing attempt.
    pub pairing_window: Duration,
    pub phone_pairing_timeout: Duration,
    pub status_write_timeout: Duration,
    /// Grace period for a worker to stop before it is aborted.
    pub stop_timeout: Duration,
    pub resume: ResumeConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            pairing_artifact_timeout: Duration::from_secs(30),
            pairing_artifact_validity: Duration::from_secs(20),
            pairing_window: Duration::from_secs(180),
            phone_pairing_timeout: Duration::from_secs(30),
            status_write_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(10),
            resume: ResumeConfig::default(),
        }
    }
}

/// Snapshot of a registered worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub session_id: SessionId,
    pub generation: u64,
    pub status: SessionStatus,
    pub external_identity: Option<String>,
    pub idle_secs: u64,
    pub pairing_pending: bool,
}

/// Strip formatting from a phone number and check its length.
///
/// Spaces, dashes, dots, parentheses and a leading `+` are removed. The
/// result must be 10 to 15 digits.
pub fn normalize_phone_number(raw: &str) -> Result<String> {
    let digits: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(GatewayError::Validation(format!(
            "phone number contains invalid characters: {raw}"
        )));
    }
    if !(10..=15).contains(&digits.len()) {
        return Err(GatewayError::Validation(
            "phone number must have 10 to 15 digits".into(),
        ));
    }
    Ok(digits)
}

fn validate_recipient(to: &str) -> Result<String> {
    let to = to.trim();
    if to.is_empty() {
        return Err(GatewayError::Validation("recipient cannot be empty".into()));
    }
    match to.split_once('@') {
        Some((user, server)) if !user.is_empty() && !server.is_empty() => Ok(to.to_string()),
        Some(_) => Err(GatewayError::Validation(format!("invalid recipient: {to}"))),
        None => normalize_phone_number(to),
    }
}

/// Upward interface of the orchestrator.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn ClientFactory>,
    registry: Registry,
    sync: Arc<StatusSynchronizer>,
    config: OrchestratorConfig,
    start_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        factory: Arc<dyn ClientFactory>,
        config: OrchestratorConfig,
    ) -> Self {
        let sync = Arc::new(StatusSynchronizer::new(
            Arc::clone(&store),
            config.status_write_timeout,
        ));
        Self {
            store,
            factory,
            registry: Registry::new(config.max_sessions),
            sync,
            config,
            start_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    /// Spawn the startup resumer against this manager.
    pub fn spawn_resumer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        spawn_resumer(
            self.store(),
            Arc::clone(self) as Arc<dyn SessionStarter>,
            self.config.resume.clone(),
        )
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            store: Arc::clone(&self.store),
            sync: Arc::clone(&self.sync),
            pairing: PairingSettings {
                window: self.config.pairing_window,
                artifact_validity: self.config.pairing_artifact_validity,
                write_timeout: self.config.status_write_timeout,
            },
            stop_timeout: self.config.stop_timeout,
        }
    }

    fn start_lock(&self, id: &SessionId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .start_locks
            .lock()
            .map_err(|_| GatewayError::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(id.clone()).or_default()))
    }

    /// Overlay the live worker status onto a stored row.
    fn with_live_status(&self, mut session: Session) -> Result<Session> {
        if let Some(worker) = self.registry.get(&session.id)? {
            session.status = worker.status();
        }
        Ok(session)
    }

    /// Registered worker for `id`, distinguishing unknown from idle sessions.
    async fn require_worker(&self, id: &SessionId) -> Result<Arc<Worker>> {
        if let Some(worker) = self.registry.get(id)? {
            return Ok(worker);
        }
        self.store.get_by_id(id).await?;
        Err(GatewayError::NotConnected(format!(
            "session {id} has not been started"
        )))
    }

    // ---- session records ----

    pub async fn create_session(&self, name: &str) -> Result<Session> {
        let session = Session::new(name)?;
        self.store.create(&session).await?;
        info!(session_id = %session.id, name = %session.name, "session created");
        Ok(session)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.store
            .list()
            .await?
            .into_iter()
            .map(|session| self.with_live_status(session))
            .collect()
    }

    pub async fn session(&self, id: &SessionId) -> Result<Session> {
        let session = self.store.get_by_id(id).await?;
        self.with_live_status(session)
    }

    /// Stop any worker, then delete the row.
    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        self.store.get_by_id(id).await?;
        self.stop_session(id).await?;
        self.store.delete(id).await?;
        self.sync.forget(id);
        if let Ok(mut locks) = self.start_locks.lock() {
            locks.remove(id);
        }
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    // ---- lifecycle ----

    /// Start the session's worker.
    ///
    /// Returns immediately once the worker is registered. A worker that is
    /// already connecting or connected is left alone.
    pub async fn start_session(&self, id: &SessionId) -> Result<()> {
        let lock = self.start_lock(id)?;
        let _guard = lock.lock().await;

        if let Some(worker) = self.registry.get(id)? {
            if worker.is_live() {
                debug!(session_id = %id, status = %worker.status(), "session already running");
                return Ok(());
            }
        }

        let session = self.store.get_by_id(id).await?;
        let client = self.factory.create(&session).await?;
        let ctx = self.worker_context();

        let registration = self.registry.register(id, |generation| {
            Arc::new(Worker::new(&session, generation, client, ctx))
        })?;

        match registration {
            Registration::Started(worker) => {
                info!(
                    session_id = %id,
                    generation = worker.generation(),
                    paired = session.is_paired(),
                    "session starting"
                );
            }
            Registration::Existing(worker) => {
                debug!(session_id = %id, status = %worker.status(), "session already running");
            }
        }
        Ok(())
    }

    /// Stop the session's worker. A no-op if none is registered.
    pub async fn stop_session(&self, id: &SessionId) -> Result<()> {
        let Some(worker) = self.registry.get(id)? else {
            return Ok(());
        };

        worker.shutdown(self.config.stop_timeout).await;
        if self.registry.remove_if_current(id, worker.generation())? {
            info!(session_id = %id, "session stopped");
        }
        Ok(())
    }

    /// Log the session out and forget its credentials.
    pub async fn logout_session(&self, id: &SessionId) -> Result<()> {
        self.store.get_by_id(id).await?;

        if let Some(worker) = self.registry.get(id)? {
            if let Err(e) = worker.client().logout().await {
                warn!(session_id = %id, error = %e, "client logout failed");
            }
            worker.clear_identity();
            self.stop_session(id).await?;
        }

        self.sync.clear_authentication(id).await?;
        info!(session_id = %id, "session logged out");
        Ok(())
    }

    /// Current status; `Disconnected` for sessions without a worker.
    pub async fn status(&self, id: &SessionId) -> Result<SessionStatus> {
        if let Some(worker) = self.registry.get(id)? {
            return Ok(worker.status());
        }
        self.store.get_by_id(id).await?;
        Ok(SessionStatus::Disconnected)
    }

    pub fn worker_info(&self, id: &SessionId) -> Result<WorkerInfo> {
        let worker = self
            .registry
            .get(id)?
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        Ok(WorkerInfo {
            session_id: id.clone(),
            generation: worker.generation(),
            status: worker.status(),
            external_identity: worker.external_identity(),
            idle_secs: worker.idle_for().as_secs(),
            pairing_pending: worker.cached_artifact().is_some(),
        })
    }

    // ---- pairing ----

    /// Pairing code for a session that is mid-pairing.
    ///
    /// A fresh cached code is returned as-is; otherwise waits for the next
    /// one, bounded by the artifact timeout.
    pub async fn pairing_artifact(&self, id: &SessionId) -> Result<PairingArtifact> {
        let worker = self.require_worker(id).await?;
        if worker.status() == SessionStatus::Connected {
            return Err(GatewayError::AlreadyConnected(id.to_string()));
        }

        pairing::wait_for_artifact(
            id,
            worker.subscribe_artifacts(),
            worker.subscribe_status(),
            self.config.pairing_artifact_timeout,
        )
        .await
    }

    /// Request a linking code for phone-number pairing.
    pub async fn pair_phone(&self, id: &SessionId, phone_number: &str) -> Result<String> {
        let phone_number = normalize_phone_number(phone_number)?;
        let worker = self.require_worker(id).await?;
        if worker.status() == SessionStatus::Connected {
            return Err(GatewayError::AlreadyConnected(id.to_string()));
        }

        let client = worker.client();
        let code = tokio::time::timeout(
            self.config.phone_pairing_timeout,
            client.pair_phone(&phone_number),
        )
        .await
        .map_err(|_| GatewayError::PairingTimeout)??;

        info!(session_id = %id, "phone linking code issued");
        Ok(code)
    }

    // ---- messaging ----

    /// Send a text message, returning the message ID.
    pub async fn send_text(&self, id: &SessionId, to: &str, body: &str) -> Result<String> {
        let to = validate_recipient(to)?;
        if body.trim().is_empty() {
            return Err(GatewayError::Validation("message body cannot be empty".into()));
        }

        let worker = self.require_worker(id).await?;
        if worker.status() != SessionStatus::Connected {
            return Err(GatewayError::NotConnected(id.to_string()));
        }

        let message_id = worker.client().send_text(&to, body).await?;
        debug!(session_id = %id, message_id = %message_id, "text message sent");
        Ok(message_id)
    }

    // ---- registry views ----

    /// IDs of every registered worker.
    pub fn active_session_ids(&self) -> Result<Vec<SessionId>> {
        self.registry.list_active()
    }

    pub fn connected_session_ids(&self) -> Result<Vec<SessionId>> {
        self.registry.list_connected()
    }

    pub fn count(&self) -> Result<usize> {
        self.registry.count()
    }

    /// Stop every worker for process exit.
    ///
    /// Durable rows keep their status, so sessions connected now are
    /// resumed on the next startup.
    pub async fn shutdown(&self) -> Result<()> {
        let workers = self.registry.drain()?;
        if workers.is_empty() {
            return Ok(());
        }

        info!(count = workers.len(), "stopping all sessions");
        let grace = self.config.stop_timeout;
        for worker in &workers {
            worker.detach_from_store();
        }
        join_all(workers.iter().map(|worker| worker.shutdown(grace))).await;
        Ok(())
    }
}

#[async_trait]
impl SessionStarter for SessionManager {
    async fn start_session(&self, id: &SessionId) -> Result<()> {
        SessionManager::start_session(self, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{LoopbackConfig, LoopbackFactory};
    use crate::store::MemorySessionStore;

    fn manager(max_sessions: usize) -> (SessionManager, Arc<LoopbackFactory>) {
        let factory = Arc::new(LoopbackFactory::new(LoopbackConfig::manual()));
        let config = OrchestratorConfig {
            max_sessions,
            pairing_artifact_timeout: Duration::from_millis(200),
            stop_timeout: Duration::from_secs(1),
            ..OrchestratorConfig::default()
        };
        let manager = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            factory.clone(),
            config,
        );
        (manager, factory)
    }

    #[test]
    fn test_normalize_phone_number() {
        assert_eq!(
            normalize_phone_number("+55 (11) 99999-9999").unwrap(),
            "5511999999999"
        );
        assert!(normalize_phone_number("12345").is_err());
        assert!(normalize_phone_number("1234567890123456").is_err());
        assert!(normalize_phone_number("55119999x9999").is_err());
    }

    #[test]
    fn test_validate_recipient() {
        assert_eq!(validate_recipient(" 1234@ext ").unwrap(), "1234@ext");
        assert_eq!(
            validate_recipient("55 11 99999 9999").unwrap(),
            "5511999999999"
        );
        assert!(validate_recipient("").is_err());
        assert!(validate_recipient("@ext").is_err());
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let (manager, _) = manager(4);
        let session = manager.create_session("  alice ").await.unwrap();
        assert_eq!(session.name, "alice");

        let err = manager.create_session("alice").await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));

        let sessions = manager.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_start_unknown_session() {
        let (manager, _) = manager(4);
        let err = manager
            .start_session(&SessionId::from_raw("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        assert_eq!(manager.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_without_worker_is_noop() {
        let (manager, _) = manager(4);
        manager
            .stop_session(&SessionId::from_raw("nobody"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_of_idle_session() {
        let (manager, _) = manager(4);
        let session = manager.create_session("idle").await.unwrap();
        assert_eq!(
            manager.status(&session.id).await.unwrap(),
            SessionStatus::Disconnected
        );
        assert!(matches!(
            manager.status(&SessionId::from_raw("missing")).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_start_reaches_connecting() {
        let (manager, factory) = manager(4);
        let session = manager.create_session("pairing").await.unwrap();

        manager.start_session(&session.id).await.unwrap();
        assert_eq!(
            manager.status(&session.id).await.unwrap(),
            SessionStatus::Connecting
        );
        assert_eq!(factory.created_count(), 1);

        let info = manager.worker_info(&session.id).unwrap();
        assert_eq!(info.status, SessionStatus::Connecting);
        assert!(info.external_identity.is_none());
    }

    #[tokio::test]
    async fn test_pairing_artifact_requires_worker() {
        let (manager, _) = manager(4);
        let session = manager.create_session("idle").await.unwrap();

        assert!(matches!(
            manager.pairing_artifact(&session.id).await,
            Err(GatewayError::NotConnected(_))
        ));
        assert!(matches!(
            manager.pairing_artifact(&SessionId::from_raw("missing")).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pairing_artifact_times_out_without_code() {
        let (manager, _) = manager(4);
        let session = manager.create_session("slow").await.unwrap();
        manager.start_session(&session.id).await.unwrap();

        assert!(matches!(
            manager.pairing_artifact(&session.id).await,
            Err(GatewayError::PairingTimeout)
        ));
    }

    #[tokio::test]
    async fn test_pair_phone_validates_number() {
        let (manager, _) = manager(4);
        let session = manager.create_session("phone").await.unwrap();
        manager.start_session(&session.id).await.unwrap();

        assert!(matches!(
            manager.pair_phone(&session.id, "123").await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_send_text_requires_connection() {
        let (manager, _) = manager(4);
        let session = manager.create_session("quiet").await.unwrap();
        manager.start_session(&session.id).await.unwrap();

        assert!(matches!(
            manager.send_text(&session.id, "1234@ext", "hi").await,
            Err(GatewayError::NotConnected(_))
        ));
        assert!(matches!(
            manager.send_text(&session.id, "1234@ext", "   ").await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_stops_worker() {
        let (manager, _) = manager(4);
        let session = manager.create_session("gone").await.unwrap();
        manager.start_session(&session.id).await.unwrap();

        manager.delete_session(&session.id).await.unwrap();
        assert_eq!(manager.count().unwrap(), 0);
        assert!(matches!(
            manager.session(&session.id).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_drains_registry() {
        let (manager, _) = manager(4);
        for name in ["a", "b"] {
            let session = manager.create_session(name).await.unwrap();
            manager.start_session(&session.id).await.unwrap();
        }
        assert_eq!(manager.count().unwrap(), 2);

        manager.shutdown().await.unwrap();
        assert_eq!(manager.count().unwrap(), 0);
    }
}
