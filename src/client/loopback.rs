//! In-process protocol backend.
//!
//! `LoopbackClient` speaks no network protocol. It issues pairing codes on
//! a timer, accepts phone pairing, and records outgoing messages, which is
//! enough to drive the whole orchestrator locally. Every client also hands
//! out a [`LoopbackControl`] so tests can inject events deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{ClientError, ClientEvent, ClientFactory, PairingEvent, ProtocolClient};
use crate::session::{Session, SessionId};

const EVENT_BUFFER: usize = 32;
const PAIRING_BUFFER: usize = 8;

/// Behaviour of loopback clients.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Interval between pairing codes. `None` issues codes only on request.
    pub code_interval: Option<Duration>,
    /// Codes issued before the pairing stream times out.
    pub codes_before_timeout: usize,
    /// Delay before a phone pairing is confirmed. `None` waits for a control call.
    pub phone_confirm_delay: Option<Duration>,
    /// Make every `connect` fail with this message.
    pub connect_error: Option<String>,
    /// Panic inside `connect`.
    pub panic_on_connect: bool,
    /// `connect` never returns.
    pub stall_connect: bool,
    /// `disconnect` closes the connection but never returns.
    pub stall_disconnect: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            code_interval: Some(Duration::from_secs(20)),
            codes_before_timeout: 6,
            phone_confirm_delay: Some(Duration::from_secs(5)),
            connect_error: None,
            panic_on_connect: false,
            stall_connect: false,
            stall_disconnect: false,
        }
    }
}

impl LoopbackConfig {
    /// Nothing happens unless driven through [`LoopbackControl`].
    pub fn manual() -> Self {
        Self {
            code_interval: None,
            codes_before_timeout: usize::MAX,
            phone_confirm_delay: None,
            connect_error: None,
            panic_on_connect: false,
            stall_connect: false,
            stall_disconnect: false,
        }
    }

    /// Fail every connect attempt.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            connect_error: Some(reason.into()),
            ..Self::manual()
        }
    }
}

struct Inner {
    session_id: SessionId,
    config: LoopbackConfig,
    identity: Mutex<Option<String>>,
    connected: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
    pairing: Mutex<Option<mpsc::Sender<PairingEvent>>>,
    rotation: Mutex<Option<JoinHandle<()>>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    next_code: AtomicU64,
    next_message: AtomicU64,
    sent: Mutex<Vec<(String, String)>>,
}

impl Inner {
    fn identity(&self) -> Option<String> {
        self.identity.lock().ok().and_then(|id| id.clone())
    }

    fn set_identity(&self, identity: Option<String>) {
        if let Ok(mut slot) = self.identity.lock() {
            *slot = identity;
        }
    }

    fn pairing_sender(&self) -> Option<mpsc::Sender<PairingEvent>> {
        self.pairing.lock().ok().and_then(|tx| tx.clone())
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn send_pairing(&self, event: PairingEvent) -> bool {
        match self.pairing_sender() {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    fn issue_code(&self) -> String {
        let n = self.next_code.fetch_add(1, Ordering::Relaxed) + 1;
        let code = format!("{n}@{}", uuid::Uuid::new_v4().simple());
        self.send_pairing(PairingEvent::Code(code.clone()));
        code
    }

    fn complete_pairing(&self, identity: &str) {
        self.set_identity(Some(identity.to_string()));
        self.connected.store(true, Ordering::SeqCst);
        self.stop_rotation();
        self.send_pairing(PairingEvent::Success {
            identity: identity.to_string(),
        });
        self.emit(ClientEvent::PairSuccess {
            identity: identity.to_string(),
        });
        self.emit(ClientEvent::Connected);
    }

    fn stop_rotation(&self) {
        if let Ok(mut rotation) = self.rotation.lock() {
            if let Some(task) = rotation.take() {
                task.abort();
            }
        }
    }
}

/// Cloneable handle for driving a loopback client from outside.
#[derive(Clone)]
pub struct LoopbackControl {
    inner: Arc<Inner>,
}

impl LoopbackControl {
    /// Session the client was created for.
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Push a specific pairing code. Returns false if no stream is open.
    pub fn emit_code(&self, code: impl Into<String>) -> bool {
        self.inner.send_pairing(PairingEvent::Code(code.into()))
    }

    /// Complete pairing as `identity`.
    pub fn pair_success(&self, identity: impl Into<String>) {
        self.inner.complete_pairing(&identity.into());
    }

    /// End the pairing stream with a timeout.
    pub fn pairing_timeout(&self) -> bool {
        self.inner.stop_rotation();
        self.inner.send_pairing(PairingEvent::Timeout)
    }

    /// Simulate a clean drop of the connection.
    pub fn drop_connection(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.emit(ClientEvent::Disconnected);
    }

    /// Simulate the client reconnecting on its own.
    pub fn restore_connection(&self) {
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.emit(ClientEvent::Connected);
    }

    /// Simulate the remote end revoking the credentials.
    pub fn force_logout(&self, reason: impl Into<String>) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.set_identity(None);
        self.inner.emit(ClientEvent::LoggedOut {
            reason: reason.into(),
        });
    }

    /// Simulate the client giving up on the connection.
    pub fn fail_connection(&self, reason: impl Into<String>) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.emit(ClientEvent::ConnectFailure {
            reason: reason.into(),
        });
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls so far.
    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Messages accepted by `send_text`, as `(to, body)`.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.inner
            .sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

/// A protocol client that never leaves the process.
pub struct LoopbackClient {
    inner: Arc<Inner>,
}

impl LoopbackClient {
    /// Create a client, restoring `identity` if the session was paired.
    pub fn new(session_id: SessionId, identity: Option<String>, config: LoopbackConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                session_id,
                config,
                identity: Mutex::new(identity),
                connected: AtomicBool::new(false),
                events,
                pairing: Mutex::new(None),
                rotation: Mutex::new(None),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                next_code: AtomicU64::new(0),
                next_message: AtomicU64::new(0),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Control handle for this client.
    pub fn control(&self) -> LoopbackControl {
        LoopbackControl {
            inner: Arc::clone(&self.inner),
        }
    }

    fn start_rotation(&self, interval: Duration) {
        let inner = Arc::clone(&self.inner);
        let limit = inner.config.codes_before_timeout;
        let task = tokio::spawn(async move {
            for _ in 0..limit {
                let code = inner.issue_code();
                debug!(session_id = %inner.session_id, code = %code, "loopback pairing code issued");
                tokio::time::sleep(interval).await;
            }
            inner.send_pairing(PairingEvent::Timeout);
        });
        if let Ok(mut rotation) = self.inner.rotation.lock() {
            if let Some(previous) = rotation.replace(task) {
                previous.abort();
            }
        }
    }
}

impl Drop for LoopbackClient {
    fn drop(&mut self) {
        self.inner.stop_rotation();
    }
}

fn linking_code(phone_number: &str) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTVWXYZ123456789";
    let mut seed = phone_number
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |acc, b| {
            (acc ^ b as u64).wrapping_mul(0x0100_0000_01b3)
        });
    let mut code = String::with_capacity(9);
    for i in 0..8 {
        if i == 4 {
            code.push('-');
        }
        code.push(ALPHABET[(seed % ALPHABET.len() as u64) as usize] as char);
        seed /= ALPHABET.len() as u64;
    }
    code
}

#[async_trait]
impl ProtocolClient for LoopbackClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        if self.inner.config.panic_on_connect {
            panic!("loopback client configured to panic on connect");
        }
        if let Some(reason) = &self.inner.config.connect_error {
            return Err(ClientError::Connect(reason.clone()));
        }
        if self.inner.config.stall_connect {
            std::future::pending::<()>().await;
        }

        if self.inner.identity().is_some() {
            self.inner.connected.store(true, Ordering::SeqCst);
            self.inner.emit(ClientEvent::Connected);
            return Ok(());
        }

        if self.inner.pairing_sender().is_none() {
            return Err(ClientError::Pairing(
                "pairing stream must be opened before connecting".into(),
            ));
        }
        if let Some(interval) = self.inner.config.code_interval {
            self.start_rotation(interval);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.stop_rotation();
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Ok(mut pairing) = self.inner.pairing.lock() {
            pairing.take();
        }
        if self.inner.config.stall_disconnect {
            std::future::pending::<()>().await;
        }
    }

    async fn logout(&self) -> Result<(), ClientError> {
        if self.inner.identity().is_none() {
            return Err(ClientError::NotConnected);
        }
        self.inner.set_identity(None);
        self.inner.connected.store(false, Ordering::SeqCst);
        info!(session_id = %self.inner.session_id, "loopback client logged out");
        Ok(())
    }

    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>, ClientError> {
        if self.inner.identity().is_some() {
            return Err(ClientError::Pairing("client is already paired".into()));
        }
        let (tx, rx) = mpsc::channel(PAIRING_BUFFER);
        if let Ok(mut pairing) = self.inner.pairing.lock() {
            *pairing = Some(tx);
        }
        Ok(rx)
    }

    async fn pair_phone(&self, phone_number: &str) -> Result<String, ClientError> {
        if self.inner.identity().is_some() {
            return Err(ClientError::Pairing("client is already paired".into()));
        }
        if self.inner.pairing_sender().is_none() {
            return Err(ClientError::Pairing("pairing is not in progress".into()));
        }

        let code = linking_code(phone_number);
        if let Some(delay) = self.inner.config.phone_confirm_delay {
            let inner = Arc::clone(&self.inner);
            let identity = format!("{phone_number}@loopback");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.complete_pairing(&identity);
            });
        }
        Ok(code)
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<String, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let n = self.inner.next_message.fetch_add(1, Ordering::Relaxed) + 1;
        if let Ok(mut sent) = self.inner.sent.lock() {
            sent.push((to.to_string(), body.to_string()));
        }
        Ok(format!("LB{n:016X}"))
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn external_identity(&self) -> Option<String> {
        self.inner.identity()
    }
}

/// Factory producing loopback clients and remembering their controls.
pub struct LoopbackFactory {
    config: LoopbackConfig,
    controls: RwLock<HashMap<SessionId, LoopbackControl>>,
    created: AtomicUsize,
}

impl LoopbackFactory {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            controls: RwLock::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Control of the most recent client built for `id`.
    pub fn control(&self, id: &SessionId) -> Option<LoopbackControl> {
        self.controls
            .read()
            .ok()
            .and_then(|controls| controls.get(id).cloned())
    }

    /// Total clients built.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackFactory {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

#[async_trait]
impl ClientFactory for LoopbackFactory {
    async fn create(&self, session: &Session) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        let identity = session
            .is_paired()
            .then(|| session.external_identity.clone());
        let client = LoopbackClient::new(session.id.clone(), identity, self.config.clone());

        if let Ok(mut controls) = self.controls.write() {
            controls.insert(session.id.clone(), client.control());
        }
        self.created.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(client))
    }
}
