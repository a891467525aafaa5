//! Startup resumer.
//!
//! Once per process, after a settle delay, restarts every session that was
//! connected when the process last ran.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::session::{SessionId, SessionStatus};
use crate::store::SessionStore;
use crate::Result;

/// Timing for the startup resume pass.
#[derive(Debug, Clone)]
pub struct ResumeConfig {
    pub enabled: bool,
    /// Delay before the first start.
    pub settle: Duration,
    /// Delay between successive starts.
    pub stagger: Duration,
    /// Upper bound on the whole pass, settle excluded.
    pub budget: Duration,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settle: Duration::from_secs(2),
            stagger: Duration::from_millis(500),
            budget: Duration::from_secs(30),
        }
    }
}

/// Entry point the resumer starts sessions through.
#[async_trait]
pub trait SessionStarter: Send + Sync {
    async fn start_session(&self, id: &SessionId) -> Result<()>;
}

/// Summary of one resume pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub candidates: usize,
    pub started: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: bool,
}

/// Restart sessions last known connected that still hold an identity.
pub async fn resume_sessions(
    store: &dyn SessionStore,
    starter: &dyn SessionStarter,
    config: &ResumeConfig,
) -> Result<ResumeReport> {
    tokio::time::sleep(config.settle).await;

    let sessions = store.sessions_with_status(SessionStatus::Connected).await?;
    let mut report = ResumeReport {
        candidates: sessions.len(),
        ..ResumeReport::default()
    };

    let pass = async {
        for (i, session) in sessions.iter().enumerate() {
            if !session.is_paired() {
                report.skipped += 1;
                continue;
            }
            if i > 0 {
                tokio::time::sleep(config.stagger).await;
            }
            match starter.start_session(&session.id).await {
                Ok(()) => {
                    info!(session_id = %session.id, name = %session.name, "session resumed");
                    report.started += 1;
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "failed to resume session");
                    report.failed += 1;
                }
            }
        }
    };

    let finished = tokio::time::timeout(config.budget, pass).await.is_ok();
    if !finished {
        warn!("session resume exceeded its time budget");
        report.timed_out = true;
    }
    Ok(report)
}

/// Run [`resume_sessions`] in the background.
pub fn spawn_resumer(
    store: Arc<dyn SessionStore>,
    starter: Arc<dyn SessionStarter>,
    config: ResumeConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            return;
        }
        match resume_sessions(store.as_ref(), starter.as_ref(), &config).await {
            Ok(report) => info!(
                candidates = report.candidates,
                started = report.started,
                failed = report.failed,
                skipped = report.skipped,
                "session resume finished"
            ),
            Err(e) => warn!(error = %e, "session resume failed"),
        }
    })
}
