//! Connection worker.
//!
//! One worker per active session. It owns the session's protocol client and
//! is the only writer of the session's status once its task is running.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!       ^             |   \         |
//!       |             v    v        v
//!       +-------- Disconnected    Error
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pairing::{PairingArtifact, PairingCoordinator, PairingOutcome, PairingSettings};
use super::sync::StatusSynchronizer;
use crate::client::{ClientEvent, ProtocolClient};
use crate::session::{Session, SessionId, SessionStatus};
use crate::store::SessionStore;

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn SessionStore>,
    pub sync: Arc<StatusSynchronizer>,
    pub pairing: PairingSettings,
    pub stop_timeout: Duration,
}

/// Runtime state of one session's connection.
pub struct Worker {
    session_id: SessionId,
    generation: u64,
    client: Arc<dyn ProtocolClient>,
    ctx: WorkerContext,
    cancel: CancellationToken,
    exited: CancellationToken,
    status: watch::Sender<SessionStatus>,
    artifacts: watch::Sender<Option<PairingArtifact>>,
    identity: RwLock<Option<String>>,
    last_activity: Mutex<Instant>,
    task: Mutex<Option<JoinHandle<()>>>,
    mirrored: AtomicBool,
}

impl Worker {
    pub fn new(
        session: &Session,
        generation: u64,
        client: Arc<dyn ProtocolClient>,
        ctx: WorkerContext,
    ) -> Self {
        let identity = session
            .is_paired()
            .then(|| session.external_identity.clone());
        Self {
            session_id: session.id.clone(),
            generation,
            client,
            ctx,
            cancel: CancellationToken::new(),
            exited: CancellationToken::new(),
            status: watch::channel(SessionStatus::Disconnected).0,
            artifacts: watch::channel(None).0,
            identity: RwLock::new(identity),
            last_activity: Mutex::new(Instant::now()),
            task: Mutex::new(None),
            mirrored: AtomicBool::new(true),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Registration counter value; distinguishes a worker from its successors.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn client(&self) -> Arc<dyn ProtocolClient> {
        Arc::clone(&self.client)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_artifacts(&self) -> watch::Receiver<Option<PairingArtifact>> {
        self.artifacts.subscribe()
    }

    /// The current pairing artifact, if one is still fresh.
    pub fn cached_artifact(&self) -> Option<PairingArtifact> {
        self.artifacts
            .borrow()
            .clone()
            .filter(PairingArtifact::is_fresh)
    }

    pub fn external_identity(&self) -> Option<String> {
        self.identity.read().ok().and_then(|id| id.clone())
    }

    /// Time since the last lifecycle event.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// Whether this worker is running and connecting or connected.
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.exited.is_cancelled() && self.status().is_live()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Forget the identity held in memory.
    pub fn clear_identity(&self) {
        if let Ok(mut identity) = self.identity.write() {
            *identity = None;
        }
    }

    /// Stop mirroring transitions into the store.
    ///
    /// Used on process shutdown: the row keeps its last durable status so
    /// the next startup resumes the session.
    pub fn detach_from_store(&self) {
        self.mirrored.store(false, Ordering::SeqCst);
    }

    pub(crate) fn attach(&self, task: JoinHandle<()>) {
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
    }

    /// Apply a status transition and publish it.
    ///
    /// Returns whether the status changed.
    pub(crate) fn transition(&self, target: SessionStatus) -> bool {
        if !self.mark(target) {
            return false;
        }
        let identity = match target {
            SessionStatus::Connected => self.external_identity(),
            _ => None,
        };
        self.persist(target, identity);
        true
    }

    /// Apply a status transition in memory only.
    ///
    /// Same-state transitions are ignored. Transitions the state machine
    /// does not allow are logged and dropped.
    pub(crate) fn mark(&self, target: SessionStatus) -> bool {
        let mut from = target;
        let changed = self.status.send_if_modified(|current| {
            from = *current;
            if *current == target || !current.can_transition_to(target) {
                return false;
            }
            *current = target;
            true
        });

        if !changed {
            if from != target {
                warn!(
                    session_id = %self.session_id,
                    from = %from,
                    to = %target,
                    "ignoring illegal status transition"
                );
            }
            return false;
        }

        self.touch();
        info!(session_id = %self.session_id, from = %from, to = %target, "session status changed");
        true
    }

    fn persist(&self, status: SessionStatus, identity: Option<String>) {
        if self.mirrored.load(Ordering::SeqCst) {
            self.ctx.sync.publish(&self.session_id, status, identity);
        }
    }

    /// Signal the worker to stop. Harmless if it already exited.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to exit.
    ///
    /// If the task does not finish within `grace` it is aborted and the
    /// client disconnected directly, again bounded by `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel();
        if tokio::time::timeout(grace, self.exited.cancelled())
            .await
            .is_ok()
        {
            return;
        }

        warn!(
            session_id = %self.session_id,
            generation = self.generation,
            "worker did not stop in time, aborting"
        );
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        if tokio::time::timeout(grace, self.client.disconnect())
            .await
            .is_err()
        {
            warn!(session_id = %self.session_id, "client did not disconnect in time");
        }
        if self.status().is_live() {
            self.transition(SessionStatus::Disconnected);
        }
    }

    /// Task body. `predecessor` is the worker this one replaces.
    pub(crate) async fn run(self: Arc<Self>, predecessor: Option<Arc<Worker>>) {
        let _exited = self.exited.clone().drop_guard();

        if let Some(previous) = predecessor {
            debug!(
                session_id = %self.session_id,
                generation = previous.generation(),
                "stopping previous worker"
            );
            previous.shutdown(self.ctx.stop_timeout).await;
        }
        // Published here, after the predecessor's last write.
        if self.status() == SessionStatus::Connecting {
            self.persist(SessionStatus::Connecting, None);
        }

        if let Err(panic) = AssertUnwindSafe(self.drive()).catch_unwind().await {
            error!(
                session_id = %self.session_id,
                panic = %panic_message(&*panic),
                "worker panicked"
            );
            self.transition(SessionStatus::Error);
        }

        if AssertUnwindSafe(self.client.disconnect())
            .catch_unwind()
            .await
            .is_err()
        {
            error!(session_id = %self.session_id, "client panicked while disconnecting");
        }

        if self.status().is_live() {
            self.transition(SessionStatus::Disconnected);
        }
        debug!(session_id = %self.session_id, generation = self.generation, "worker exited");
    }

    async fn drive(&self) {
        // Subscribe first so no event raised by connect is missed.
        let mut events = self.client.subscribe();

        if self.cancel.is_cancelled() {
            return;
        }

        if self.external_identity().is_some() {
            debug!(session_id = %self.session_id, "reconnecting with stored credentials");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.client.connect() => {
                    if let Err(e) = result {
                        warn!(session_id = %self.session_id, error = %e, "reconnect failed");
                        self.transition(SessionStatus::Error);
                        return;
                    }
                }
            }
        } else {
            let coordinator = PairingCoordinator::new(
                &self.session_id,
                self.client.as_ref(),
                self.ctx.store.as_ref(),
                &self.artifacts,
                &self.ctx.pairing,
            );
            match coordinator.run(&self.cancel).await {
                PairingOutcome::Paired(identity) => {
                    self.set_identity(identity);
                    self.transition(SessionStatus::Connected);
                }
                PairingOutcome::Cancelled => return,
                PairingOutcome::TimedOut => {
                    self.transition(SessionStatus::Error);
                    return;
                }
                PairingOutcome::Failed(reason) => {
                    warn!(session_id = %self.session_id, reason = %reason, "pairing failed");
                    self.transition(SessionStatus::Error);
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(session_id = %self.session_id, "worker cancelled");
                    return;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        if !self.handle_event(event) {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session_id = %self.session_id, skipped, "client events lagged");
                    }
                    Err(RecvError::Closed) => {
                        warn!(session_id = %self.session_id, "client event stream closed");
                        self.transition(SessionStatus::Error);
                        return;
                    }
                },
            }
        }
    }

    /// Apply one client event. Returns false when the worker should exit.
    fn handle_event(&self, event: ClientEvent) -> bool {
        self.touch();
        let terminal = event.is_terminal();
        match event {
            ClientEvent::Connected => {
                if let Some(identity) = self.client.external_identity() {
                    self.set_identity(identity);
                }
                self.transition(SessionStatus::Connected);
            }
            ClientEvent::Disconnected => {
                self.transition(SessionStatus::Disconnected);
            }
            ClientEvent::PairSuccess { identity } => {
                let known = self.external_identity().as_deref() == Some(identity.as_str());
                self.set_identity(identity.clone());
                if !self.transition(SessionStatus::Connected) && !known {
                    self.persist(self.status(), Some(identity));
                }
            }
            ClientEvent::LoggedOut { reason } => {
                warn!(session_id = %self.session_id, reason = %reason, "logged out by remote end");
                self.clear_identity();
                self.transition(SessionStatus::Error);
                self.persist(SessionStatus::Error, Some(String::new()));
            }
            ClientEvent::ConnectFailure { reason } => {
                warn!(session_id = %self.session_id, reason = %reason, "connection failed");
                self.transition(SessionStatus::Error);
            }
        }
        !terminal
    }

    fn set_identity(&self, identity: String) {
        if let Ok(mut slot) = self.identity.write() {
            *slot = Some(identity);
        }
    }

    fn touch(&self) {
        if let Ok(mut at) = self.last_activity.lock() {
            *at = Instant::now();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
