//! Pairing coordination.
//!
//! A worker whose session has no stored identity hands its client to a
//! [`PairingCoordinator`]. The coordinator opens the pairing stream, starts
//! the connection, and publishes each issued code twice: into the worker's
//! artifact slot, where API readers wait on it, and into the store, so a
//! reader that only sees the row observes the same value.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{PairingEvent, ProtocolClient};
use crate::error::GatewayError;
use crate::session::{SessionId, SessionStatus};
use crate::store::SessionStore;
use crate::Result;

/// A pairing code ready to be shown to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingArtifact {
    pub payload: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    issued: Instant,
    #[serde(skip)]
    validity: Duration,
}

impl PairingArtifact {
    pub fn new(payload: impl Into<String>, validity: Duration) -> Self {
        let issued_at = Utc::now();
        let expires_at = issued_at
            + chrono::Duration::from_std(validity).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            payload: payload.into(),
            issued_at,
            expires_at,
            issued: Instant::now(),
            validity,
        }
    }

    /// Whether the artifact is still inside its validity window.
    pub fn is_fresh(&self) -> bool {
        self.issued.elapsed() < self.validity
    }
}

/// Timing knobs for pairing.
#[derive(Debug, Clone)]
pub struct PairingSettings {
    /// Upper bound on a whole pairing attempt.
    pub window: Duration,
    /// How long an issued code is served from cache.
    pub artifact_validity: Duration,
    /// Bound on each store write.
    pub write_timeout: Duration,
}

/// Terminal result of a pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired(String),
    TimedOut,
    Failed(String),
    Cancelled,
}

/// Drives one pairing attempt for one session.
pub struct PairingCoordinator<'a> {
    session_id: &'a SessionId,
    client: &'a dyn ProtocolClient,
    store: &'a dyn SessionStore,
    artifacts: &'a watch::Sender<Option<PairingArtifact>>,
    settings: &'a PairingSettings,
}

impl<'a> PairingCoordinator<'a> {
    pub fn new(
        session_id: &'a SessionId,
        client: &'a dyn ProtocolClient,
        store: &'a dyn SessionStore,
        artifacts: &'a watch::Sender<Option<PairingArtifact>>,
        settings: &'a PairingSettings,
    ) -> Self {
        Self {
            session_id,
            client,
            store,
            artifacts,
            settings,
        }
    }

    /// Run pairing until success, timeout, failure or cancellation.
    pub async fn run(&self, cancel: &CancellationToken) -> PairingOutcome {
        // The stream must exist before connect or the first code is lost.
        let mut events = match self.client.pairing_events().await {
            Ok(events) => events,
            Err(e) => return PairingOutcome::Failed(e.to_string()),
        };

        tokio::select! {
            _ = cancel.cancelled() => return PairingOutcome::Cancelled,
            result = self.client.connect() => {
                if let Err(e) = result {
                    return PairingOutcome::Failed(e.to_string());
                }
            }
        }

        let deadline = tokio::time::sleep(self.settings.window);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break PairingOutcome::Cancelled,
                _ = &mut deadline => {
                    warn!(session_id = %self.session_id, "pairing window elapsed");
                    break PairingOutcome::TimedOut;
                }
                event = events.recv() => match event {
                    Some(PairingEvent::Code(code)) => self.publish(code).await,
                    Some(PairingEvent::Success { identity }) => {
                        info!(session_id = %self.session_id, identity = %identity, "pairing succeeded");
                        break PairingOutcome::Paired(identity);
                    }
                    Some(PairingEvent::Timeout) => {
                        warn!(session_id = %self.session_id, "pairing timed out");
                        break PairingOutcome::TimedOut;
                    }
                    Some(PairingEvent::Error(reason)) => break PairingOutcome::Failed(reason),
                    None => break PairingOutcome::Failed("pairing stream closed".into()),
                },
            }
        };

        self.clear().await;
        outcome
    }

    async fn publish(&self, code: String) {
        debug!(session_id = %self.session_id, "pairing code received");
        self.artifacts.send_replace(Some(PairingArtifact::new(
            code.clone(),
            self.settings.artifact_validity,
        )));
        self.persist(&code).await;
    }

    async fn clear(&self) {
        self.artifacts.send_replace(None);
        self.persist("").await;
    }

    async fn persist(&self, payload: &str) {
        let write = self.store.set_pairing_payload(self.session_id, payload);
        match tokio::time::timeout(self.settings.write_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(session_id = %self.session_id, error = %e, "failed to persist pairing payload")
            }
            Err(_) => warn!(session_id = %self.session_id, "pairing payload write timed out"),
        }
    }
}

/// Wait for a fresh artifact to appear in `artifacts`.
///
/// Returns the cached artifact immediately while it is fresh. Fails with
/// `AlreadyConnected` if the worker connects first and `PairingTimeout` if
/// nothing arrives within `timeout`.
pub async fn wait_for_artifact(
    session_id: &SessionId,
    mut artifacts: watch::Receiver<Option<PairingArtifact>>,
    mut status: watch::Receiver<SessionStatus>,
    timeout: Duration,
) -> Result<PairingArtifact> {
    let wait = async {
        loop {
            let cached = artifacts.borrow_and_update().clone();
            if let Some(artifact) = cached.filter(PairingArtifact::is_fresh) {
                return Ok(artifact);
            }

            let current = *status.borrow_and_update();
            match current {
                SessionStatus::Connected => {
                    return Err(GatewayError::AlreadyConnected(session_id.to_string()))
                }
                SessionStatus::Connecting => {}
                other => {
                    return Err(GatewayError::NotConnected(format!(
                        "{session_id} is {other}, no pairing in progress"
                    )))
                }
            }

            tokio::select! {
                changed = artifacts.changed() => {
                    if changed.is_err() {
                        return Err(GatewayError::NotConnected(session_id.to_string()));
                    }
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        return Err(GatewayError::NotConnected(session_id.to_string()));
                    }
                }
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| GatewayError::PairingTimeout)?
}
