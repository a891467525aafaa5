//! End-to-end orchestrator scenarios.
//!
//! Each test builds an independent `SessionManager` over an in-memory store
//! and loopback clients driven through `LoopbackControl`.

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};

use pairgate::orchestrator::{resume_sessions, ResumeConfig};
use pairgate::{
    GatewayError, LoopbackConfig, LoopbackFactory, MemorySessionStore, OrchestratorConfig,
    Session, SessionId, SessionManager, SessionStatus, SessionStore,
};

struct Harness {
    manager: Arc<SessionManager>,
    factory: Arc<LoopbackFactory>,
    store: Arc<MemorySessionStore>,
}

fn harness(max_sessions: usize) -> Harness {
    harness_with(max_sessions, LoopbackConfig::manual())
}

fn harness_with(max_sessions: usize, client: LoopbackConfig) -> Harness {
    harness_over(
        Arc::new(MemorySessionStore::new()),
        client,
        config(max_sessions),
    )
}

fn config(max_sessions: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        max_sessions,
        pairing_artifact_timeout: Duration::from_secs(2),
        stop_timeout: Duration::from_secs(2),
        status_write_timeout: Duration::from_secs(1),
        ..OrchestratorConfig::default()
    }
}

fn harness_over(
    store: Arc<MemorySessionStore>,
    client: LoopbackConfig,
    config: OrchestratorConfig,
) -> Harness {
    let factory = Arc::new(LoopbackFactory::new(client));
    let manager = Arc::new(SessionManager::new(
        store.clone(),
        factory.clone(),
        config,
    ));
    Harness {
        manager,
        factory,
        store,
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_status(h: &Harness, id: &SessionId, expected: SessionStatus) {
    eventually(&format!("{id} to reach {expected}"), || async {
        h.manager.status(id).await.unwrap() == expected
    })
    .await;
}

async fn emit_code(h: &Harness, id: &SessionId, code: &str) {
    eventually("pairing stream to open", || async {
        h.factory
            .control(id)
            .map(|control| control.emit_code(code))
            .unwrap_or(false)
    })
    .await;
}

/// Create a session and take it through pairing to `Connected`.
async fn paired_session(h: &Harness, name: &str, identity: &str) -> SessionId {
    let id = h.manager.create_session(name).await.unwrap().id;
    h.manager.start_session(&id).await.unwrap();
    emit_code(h, &id, &format!("1@{name}")).await;
    h.factory.control(&id).unwrap().pair_success(identity);
    wait_for_status(h, &id, SessionStatus::Connected).await;
    id
}

#[tokio::test]
async fn scenario_a_pairing_reaches_connected_and_persists() {
    let h = harness(4);
    let id = h.manager.create_session("alice").await.unwrap().id;

    h.manager.start_session(&id).await.unwrap();
    assert_eq!(
        h.manager.status(&id).await.unwrap(),
        SessionStatus::Connecting
    );

    emit_code(&h, &id, "2@alice-code").await;
    let first = h.manager.pairing_artifact(&id).await.unwrap();
    let second = h.manager.pairing_artifact(&id).await.unwrap();
    assert_eq!(first.payload, "2@alice-code");
    assert_eq!(first.payload.as_bytes(), second.payload.as_bytes());

    eventually("pairing payload to persist", || async {
        h.store.get_by_id(&id).await.unwrap().pairing_payload == "2@alice-code"
    })
    .await;

    h.factory.control(&id).unwrap().pair_success("1234@ext");
    wait_for_status(&h, &id, SessionStatus::Connected).await;

    eventually("durable status to catch up", || async {
        let row = h.store.get_by_id(&id).await.unwrap();
        row.status == SessionStatus::Connected
            && row.external_identity == "1234@ext"
            && row.pairing_payload.is_empty()
    })
    .await;
    assert!(h
        .store
        .get_by_id(&id)
        .await
        .unwrap()
        .last_connected_at
        .is_some());
}

#[tokio::test]
async fn scenario_b_concurrent_starts_create_one_worker() {
    let h = harness(4);
    let id = h.manager.create_session("bob").await.unwrap().id;

    let (a, b) = tokio::join!(h.manager.start_session(&id), h.manager.start_session(&id));
    a.unwrap();
    b.unwrap();

    assert_eq!(h.manager.count().unwrap(), 1);
    assert_eq!(h.factory.created_count(), 1);
}

#[tokio::test]
async fn scenario_c_capacity_exceeded_leaves_count_unchanged() {
    let h = harness(2);
    for name in ["a", "b"] {
        let id = h.manager.create_session(name).await.unwrap().id;
        h.manager.start_session(&id).await.unwrap();
    }
    let carol = h.manager.create_session("carol").await.unwrap().id;

    let err = assert_err!(h.manager.start_session(&carol).await);
    assert!(matches!(err, GatewayError::CapacityExceeded { max: 2 }));
    assert_eq!(h.manager.count().unwrap(), 2);
    assert!(!h.manager.active_session_ids().unwrap().contains(&carol));
}

#[tokio::test]
async fn scenario_d_resume_starts_only_connected_sessions() {
    let h = harness(4);

    let mut connected = Session::new("was-connected").unwrap();
    connected.status = SessionStatus::Connected;
    connected.external_identity = "999@ext".into();
    h.store.create(&connected).await.unwrap();

    let idle = Session::new("was-idle").unwrap();
    h.store.create(&idle).await.unwrap();

    let report = resume_sessions(h.store.as_ref(), h.manager.as_ref(), &quick_resume())
        .await
        .unwrap();

    assert_eq!(report.started, 1);
    assert_eq!(h.manager.active_session_ids().unwrap(), vec![connected.id.clone()]);
    wait_for_status(&h, &connected.id, SessionStatus::Connected).await;
    assert_eq!(
        h.manager.status(&idle.id).await.unwrap(),
        SessionStatus::Disconnected
    );
}

fn quick_resume() -> ResumeConfig {
    ResumeConfig {
        enabled: true,
        settle: Duration::ZERO,
        stagger: Duration::ZERO,
        budget: Duration::from_secs(2),
    }
}

async fn seed_paired(store: &MemorySessionStore, name: &str, identity: &str) -> SessionId {
    let mut session = Session::new(name).unwrap();
    session.external_identity = identity.into();
    store.create(&session).await.unwrap();
    session.id
}

#[tokio::test]
async fn shutdown_keeps_sessions_resumable() {
    let h = harness(4);
    let id = paired_session(&h, "nina", "999@ext").await;
    eventually("connected row to persist", || async {
        let row = h.store.get_by_id(&id).await.unwrap();
        row.status == SessionStatus::Connected && row.external_identity == "999@ext"
    })
    .await;

    h.manager.shutdown().await.unwrap();
    assert!(!h.factory.control(&id).unwrap().is_connected());
    // Give any stray write a chance to land before checking the row.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.store.get_by_id(&id).await.unwrap().status,
        SessionStatus::Connected
    );

    let restarted = harness_over(h.store.clone(), LoopbackConfig::manual(), config(4));
    let report = resume_sessions(
        restarted.store.as_ref(),
        restarted.manager.as_ref(),
        &quick_resume(),
    )
    .await
    .unwrap();

    assert_eq!(report.started, 1);
    wait_for_status(&restarted, &id, SessionStatus::Connected).await;
}

#[tokio::test]
async fn explicit_stop_persists_disconnected() {
    let h = harness(4);
    let id = paired_session(&h, "otto", "31@ext").await;

    h.manager.stop_session(&id).await.unwrap();

    eventually("disconnected row", || async {
        h.store.get_by_id(&id).await.unwrap().status == SessionStatus::Disconnected
    })
    .await;
}

#[tokio::test]
async fn stop_is_bounded_when_connect_stalls() {
    let h = harness_with(
        4,
        LoopbackConfig {
            stall_connect: true,
            ..LoopbackConfig::manual()
        },
    );
    let id = seed_paired(&h.store, "pia", "41@ext").await;
    h.manager.start_session(&id).await.unwrap();
    let control = h.factory.control(&id).unwrap();
    eventually("connect to be attempted", || async { control.connect_count() == 1 }).await;

    let stop_timeout = h.manager.config().stop_timeout;
    assert_ok!(tokio::time::timeout(stop_timeout, h.manager.stop_session(&id)).await)
        .unwrap();

    assert!(h.manager.active_session_ids().unwrap().is_empty());
    assert!(!control.is_connected());
    assert!(control.disconnect_count() >= 1);
}

#[tokio::test]
async fn stop_aborts_a_worker_stuck_in_disconnect() {
    let mut settings = config(4);
    settings.stop_timeout = Duration::from_millis(200);
    let h = harness_over(
        Arc::new(MemorySessionStore::new()),
        LoopbackConfig {
            stall_disconnect: true,
            ..LoopbackConfig::manual()
        },
        settings,
    );
    let id = seed_paired(&h.store, "quinn", "51@ext").await;
    h.manager.start_session(&id).await.unwrap();
    wait_for_status(&h, &id, SessionStatus::Connected).await;
    let control = h.factory.control(&id).unwrap();

    // One grace period for the worker, one for the direct disconnect.
    assert_ok!(tokio::time::timeout(Duration::from_secs(2), h.manager.stop_session(&id)).await)
        .unwrap();

    assert!(h.manager.active_session_ids().unwrap().is_empty());
    assert!(!control.is_connected());
    assert_eq!(
        h.manager.status(&id).await.unwrap(),
        SessionStatus::Disconnected
    );
}

#[tokio::test]
async fn start_is_idempotent_when_connected() {
    let h = harness(4);
    let id = paired_session(&h, "dave", "42@ext").await;

    h.manager.start_session(&id).await.unwrap();

    assert_eq!(h.manager.count().unwrap(), 1);
    assert_eq!(h.factory.created_count(), 1);
    assert_eq!(
        h.manager.status(&id).await.unwrap(),
        SessionStatus::Connected
    );
}

#[tokio::test]
async fn stop_without_worker_is_a_noop() {
    let h = harness(4);
    let id = h.manager.create_session("erin").await.unwrap().id;

    assert_ok!(h.manager.stop_session(&id).await);
    assert_ok!(
        h.manager
            .stop_session(&SessionId::from_raw("never-created"))
            .await
    );
}

#[tokio::test]
async fn stop_disconnects_client_and_removes_worker() {
    let h = harness(4);
    let id = paired_session(&h, "frank", "5@ext").await;
    let control = h.factory.control(&id).unwrap();

    tokio::time::timeout(Duration::from_secs(5), h.manager.stop_session(&id))
        .await
        .expect("stop did not finish in time")
        .unwrap();

    assert!(!control.is_connected());
    assert!(control.disconnect_count() >= 1);
    assert!(h.manager.active_session_ids().unwrap().is_empty());
    assert_eq!(
        h.manager.status(&id).await.unwrap(),
        SessionStatus::Disconnected
    );
}

#[tokio::test]
async fn restart_after_error_reaches_connected_again() {
    let h = harness(1);
    let id = paired_session(&h, "gina", "8@ext").await;
    eventually("identity to persist", || async {
        h.store.get_by_id(&id).await.unwrap().external_identity == "8@ext"
    })
    .await;

    h.factory
        .control(&id)
        .unwrap()
        .fail_connection("stream errored");
    wait_for_status(&h, &id, SessionStatus::Error).await;
    assert_eq!(h.manager.count().unwrap(), 1);

    // At capacity, but replacing the failed worker does not need a new slot.
    h.manager.start_session(&id).await.unwrap();
    wait_for_status(&h, &id, SessionStatus::Connected).await;

    assert_eq!(h.factory.created_count(), 2);
    assert_eq!(h.manager.count().unwrap(), 1);
    assert_eq!(h.factory.control(&id).unwrap().connect_count(), 1);
}

#[tokio::test]
async fn remote_logout_forgets_identity() {
    let h = harness(4);
    let id = paired_session(&h, "hank", "9@ext").await;

    h.factory.control(&id).unwrap().force_logout("revoked");
    wait_for_status(&h, &id, SessionStatus::Error).await;

    eventually("identity to be cleared", || async {
        let row = h.store.get_by_id(&id).await.unwrap();
        row.status == SessionStatus::Error && row.external_identity.is_empty()
    })
    .await;
}

#[tokio::test]
async fn worker_panic_is_contained() {
    let h = harness_with(
        4,
        LoopbackConfig {
            panic_on_connect: true,
            ..LoopbackConfig::manual()
        },
    );

    let mut session = Session::new("ivy").unwrap();
    session.external_identity = "3@ext".into();
    h.store.create(&session).await.unwrap();

    h.manager.start_session(&session.id).await.unwrap();
    wait_for_status(&h, &session.id, SessionStatus::Error).await;

    let control = h.factory.control(&session.id).unwrap();
    eventually("best-effort disconnect", || async {
        control.disconnect_count() >= 1
    })
    .await;

    // The manager keeps serving after the panic.
    let other = h.manager.create_session("jack").await.unwrap().id;
    h.manager.start_session(&other).await.unwrap();
    assert_eq!(h.manager.count().unwrap(), 2);
    assert!(h.manager.worker_info(&session.id).is_ok());
}

#[tokio::test]
async fn logout_resets_durable_row() {
    let h = harness(4);
    let id = paired_session(&h, "kate", "11@ext").await;
    let control = h.factory.control(&id).unwrap();

    h.manager.logout_session(&id).await.unwrap();

    assert!(h.manager.active_session_ids().unwrap().is_empty());
    assert!(!control.is_connected());
    let row = h.store.get_by_id(&id).await.unwrap();
    assert_eq!(row.status, SessionStatus::Disconnected);
    assert!(row.external_identity.is_empty());

    // The next start has to pair again.
    h.manager.start_session(&id).await.unwrap();
    assert!(h.manager.worker_info(&id).unwrap().external_identity.is_none());
}

#[tokio::test]
async fn send_text_through_connected_session() {
    let h = harness(4);
    let id = paired_session(&h, "liam", "12@ext").await;

    let message_id = h
        .manager
        .send_text(&id, "13@ext", "hello there")
        .await
        .unwrap();
    assert!(message_id.starts_with("LB"));

    let sent = h.factory.control(&id).unwrap().sent_messages();
    assert_eq!(sent, vec![("13@ext".to_string(), "hello there".to_string())]);
}

#[tokio::test]
async fn shutdown_stops_everything() {
    let h = harness(4);
    let a = paired_session(&h, "m1", "21@ext").await;
    let b = h.manager.create_session("m2").await.unwrap().id;
    h.manager.start_session(&b).await.unwrap();

    h.manager.shutdown().await.unwrap();

    assert_eq!(h.manager.count().unwrap(), 0);
    assert!(!h.factory.control(&a).unwrap().is_connected());
}
