//! Behavioral properties of the sync layer, end to end.
//!
//! Every test builds a real engine over an in-memory local store, the
//! in-memory remote store, and the in-memory auth provider.
//!
//! - **Durability:** local write precedes visibility; remote failures lose nothing
//! - **Isolation:** a late hydration for a previous identity is dropped; a
//!   later session never reads data cached for another account
//! - **Ordering:** history is newest first regardless of insert order
//! - **Guest:** zero remote calls
//! - **Scenarios:** guest contact, rejected remote write, slow identity

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use chiron_store::LocalStore;
use chiron_sync::{
    ConnectivityMonitor, FailureMode, IdentityResolver, MemoryAuthProvider, MemoryRemoteStore,
    RemoteError, RemoteOutcome, RemoteStore, SkipReason, SliceSource, SyncConfig, SyncEngine,
    SyncError,
};
use chiron_types::{Assessment, Contact, ContactDraft, Entity, EntityId, Identity, Severity, UserId};

// ============================================================================
// Shared test setup
// ============================================================================

struct Fixture {
    engine: SyncEngine,
    identity: IdentityResolver,
    local: LocalStore,
    remote: Arc<MemoryRemoteStore>,
}

fn build(auth: MemoryAuthProvider, remote: MemoryRemoteStore, config: SyncConfig) -> Fixture {
    let local = LocalStore::in_memory();
    let remote = Arc::new(remote);
    let remote_dyn: Arc<dyn RemoteStore> = remote.clone();
    let identity = IdentityResolver::new(Arc::new(auth), local.clone(), remote_dyn.clone());
    let engine = SyncEngine::new(
        local.clone(),
        remote_dyn,
        identity.clone(),
        ConnectivityMonitor::default(),
        config,
    );
    Fixture {
        engine,
        identity,
        local,
        remote,
    }
}

impl Fixture {
    /// The local scope holding `user`'s data.
    fn scope(&self, user: &str) -> LocalStore {
        self.local.for_owner(Some(&UserId::new(user)))
    }
}

async fn authenticated(user: &str, remote: MemoryRemoteStore) -> Fixture {
    let fx = build(
        MemoryAuthProvider::new().with_session(user),
        remote,
        SyncConfig::default(),
    );
    fx.identity.resolve().await;
    fx
}

async fn guest() -> Fixture {
    let fx = build(MemoryAuthProvider::new(), MemoryRemoteStore::new(), SyncConfig::default());
    fx.identity.resolve().await;
    fx.identity.continue_as_guest().unwrap();
    fx
}

fn assessment(id: &str, created_at: u64) -> Assessment {
    Assessment::new(format!("injury {id}"))
        .with_id(id)
        .with_created_at(created_at)
}

fn history_ids(engine: &SyncEngine) -> Vec<String> {
    engine
        .snapshot()
        .assessment_history
        .iter()
        .map(|a| a.id.to_string())
        .collect()
}

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Durability
// ============================================================================

#[tokio::test]
async fn test_local_write_precedes_visibility() {
    let fx = authenticated("u1", MemoryRemoteStore::new()).await;
    fx.remote.set_latency(Some(Duration::from_millis(5)));

    // Check every published snapshot against the device.
    let violations = Arc::new(Mutex::new(Vec::<String>::new()));
    let checker = {
        let mut rx = fx.engine.state().subscribe();
        let local = fx.scope("u1");
        let violations = violations.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                for a in &snapshot.assessment_history {
                    if !local.contains::<Assessment>(&a.id).unwrap() {
                        violations.lock().push(format!("assessment {}", a.id));
                    }
                }
                for id in snapshot.contacts.keys() {
                    if !local.contains::<Contact>(id).unwrap() {
                        violations.lock().push(format!("contact {id}"));
                    }
                }
            }
        })
    };

    for i in 0..5 {
        fx.engine
            .save_assessment(assessment(&format!("a{i}"), 100 + i))
            .await
            .unwrap();
        fx.engine
            .save_contact(ContactDraft::new(format!("c{i}"), "555"))
            .await
            .unwrap();
    }
    fx.remote.set_failure(FailureMode::Unavailable);
    fx.engine.save_assessment(assessment("offline", 500)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    checker.abort();

    assert!(violations.lock().is_empty(), "visible before durable: {:?}", violations.lock());
    assert_eq!(fx.engine.snapshot().assessment_history.len(), 6);
}

#[tokio::test]
async fn test_unavailable_remote_loses_nothing() {
    let remote = MemoryRemoteStore::new();
    remote.set_failure(FailureMode::Unavailable);
    let fx = authenticated("u1", remote).await;

    let a = assessment("a1", 10);
    let out = fx.engine.save_assessment(a.clone()).await.unwrap();

    assert!(matches!(out.remote, RemoteOutcome::Failed(RemoteError::Unavailable(_))));
    assert_eq!(fx.engine.snapshot().assessment(&a.id), Some(&a));
    assert_eq!(fx.scope("u1").get::<Assessment>(&a.id).unwrap(), Some(a));
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test]
async fn test_late_hydration_for_previous_identity_is_dropped() {
    let user_a = UserId::new("user-a");
    let user_b = UserId::new("user-b");
    let remote = MemoryRemoteStore::new();
    remote.seed(&user_a, assessment("a-secret", 10).into_record());
    remote.seed(
        &user_a,
        ContactDraft::new("A's contact", "1")
            .into_contact(EntityId::new("a-contact"))
            .into_record(),
    );
    remote.seed(&user_b, assessment("b-visible", 20).into_record());

    let fx = authenticated("user-a", remote).await;
    let gate = fx.remote.hold_owner(&user_a);

    let first = {
        let engine = fx.engine.clone();
        tokio::spawn(async move { engine.load_user_data().await })
    };

    // Both of A's list calls are in flight and held.
    tokio::time::timeout(Duration::from_secs(1), async {
        while fx.remote.lists() < 2 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    fx.identity.on_auth_state_changed(Some(user_b.clone()));
    let second = fx.engine.load_user_data().await.unwrap();
    assert!(second.applied);

    gate.release();
    let first = first.await.unwrap().unwrap();
    assert!(!first.applied);

    let snapshot = fx.engine.snapshot();
    assert_eq!(history_ids(&fx.engine), vec!["b-visible"]);
    assert!(snapshot.contacts.is_empty());
    assert!(snapshot.assessment(&EntityId::new("a-secret")).is_none());
    assert_eq!(fx.identity.current(), Identity::Authenticated { user_id: user_b });
}

#[tokio::test]
async fn test_guest_after_sign_out_reads_local_only() {
    let remote = MemoryRemoteStore::new();
    let u1 = UserId::new("u1");
    remote.seed(&u1, assessment("remote-1", 10).into_record());
    remote.seed(
        &u1,
        ContactDraft::new("u1's contact", "1")
            .into_contact(EntityId::new("u1-contact"))
            .into_record(),
    );
    let fx = authenticated("u1", remote).await;
    fx.engine.load_user_data().await.unwrap();
    assert_eq!(history_ids(&fx.engine), vec!["remote-1"]);
    assert_eq!(fx.engine.snapshot().contacts.len(), 1);

    let lists_before = fx.remote.lists();
    fx.identity.sign_out().await.unwrap();
    fx.identity.continue_as_guest().unwrap();
    let report = fx.engine.load_user_data().await.unwrap();

    assert_eq!(report.identity, Identity::Guest);
    assert_eq!(report.assessments.source, SliceSource::Local);
    assert_eq!(report.contacts.source, SliceSource::Local);
    assert_eq!(fx.remote.lists(), lists_before);

    let snapshot = fx.engine.snapshot();
    assert!(snapshot.assessment_history.is_empty(), "guest sees {:?}", history_ids(&fx.engine));
    assert!(snapshot.contacts.is_empty());
    assert!(snapshot.current_assessment.is_none());

    // u1's cached copy is still on the device, under u1 only.
    assert!(fx.scope("u1").contains::<Assessment>(&EntityId::new("remote-1")).unwrap());
    assert!(fx.local.list::<Assessment>().unwrap().is_empty());
}

#[tokio::test]
async fn test_fallback_never_reads_another_accounts_cache() {
    let user_a = UserId::new("user-a");
    let remote = MemoryRemoteStore::new();
    remote.seed(&user_a, assessment("a-secret", 10).into_record());
    remote.seed(
        &user_a,
        ContactDraft::new("A's contact", "1")
            .into_contact(EntityId::new("a-contact"))
            .into_record(),
    );
    let fx = authenticated("user-a", remote).await;
    fx.engine.load_user_data().await.unwrap();
    assert_eq!(history_ids(&fx.engine), vec!["a-secret"]);

    fx.remote.set_read_failure(FailureMode::Unavailable);
    fx.identity.on_auth_state_changed(Some(UserId::new("user-b")));
    let report = fx.engine.load_user_data().await.unwrap();

    assert_eq!(report.assessments.source, SliceSource::Local);
    assert_eq!(report.contacts.source, SliceSource::Local);
    assert!(report.assessments.remote_error.is_some());
    let snapshot = fx.engine.snapshot();
    assert!(snapshot.assessment_history.is_empty());
    assert!(snapshot.contacts.is_empty());

    // A signing back in while the remote is still down gets A's own cache.
    fx.identity.on_auth_state_changed(Some(user_a));
    fx.engine.load_user_data().await.unwrap();
    assert_eq!(history_ids(&fx.engine), vec!["a-secret"]);
    assert_eq!(fx.engine.snapshot().contacts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_save_finishing_after_sign_out_stays_out_of_new_session() {
    let fx = authenticated("u1", MemoryRemoteStore::new()).await;
    fx.remote.set_latency(Some(Duration::from_millis(100)));

    let save = {
        let engine = fx.engine.clone();
        tokio::spawn(async move { engine.save_contact(ContactDraft::new("Alex", "555")).await })
    };
    // The contact is on the device and the remote call is in flight.
    tokio::time::sleep(Duration::from_millis(10)).await;
    fx.identity.on_auth_state_changed(None);

    let out = save.await.unwrap().unwrap();
    assert!(out.is_synced());
    assert!(fx.engine.snapshot().contacts.is_empty());
    assert!(fx.scope("u1").contains::<Contact>(&out.entity.id).unwrap());
    assert!(fx.local.list::<Contact>().unwrap().is_empty());
}

#[tokio::test]
async fn test_identity_watcher_rehydrates_on_sign_in() {
    let remote = MemoryRemoteStore::new();
    remote.seed(&UserId::new("u1"), assessment("r1", 10).into_record());
    let fx = build(
        MemoryAuthProvider::new().with_user("a@b.c", "pw", "u1"),
        remote,
        SyncConfig::default(),
    );
    let watcher = fx.engine.spawn_identity_watcher();
    let mut state = fx.engine.state().subscribe();

    fx.identity.resolve().await;
    fx.identity.sign_in("a@b.c", "pw").await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| s.assessment(&EntityId::new("r1")).is_some()),
    )
    .await
    .unwrap()
    .unwrap();
    watcher.abort();
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_history_is_newest_first_from_local() {
    let fx = guest().await;
    for (id, t) in [("t2", 200), ("t1", 100), ("t3", 300)] {
        fx.engine.save_assessment(assessment(id, t)).await.unwrap();
    }
    fx.engine.load_user_data().await.unwrap();
    assert_eq!(history_ids(&fx.engine), vec!["t3", "t2", "t1"]);
}

#[tokio::test]
async fn test_history_is_newest_first_from_remote() {
    let remote = MemoryRemoteStore::new();
    let owner = UserId::new("u1");
    for (id, t) in [("t1", 100), ("t3", 300), ("t2", 200)] {
        remote.seed(&owner, assessment(id, t).into_record());
    }
    let fx = authenticated("u1", remote).await;
    let report = fx.engine.load_user_data().await.unwrap();

    assert_eq!(report.assessments.source, SliceSource::Remote);
    assert_eq!(history_ids(&fx.engine), vec!["t3", "t2", "t1"]);
}

// ============================================================================
// Guest
// ============================================================================

#[tokio::test]
async fn test_guest_makes_no_remote_calls() {
    let fx = guest().await;

    let saved = fx.engine.save_assessment(Assessment::new("cut")).await.unwrap();
    assert_eq!(saved.remote, RemoteOutcome::Skipped(SkipReason::Guest));

    let mut updated = saved.into_entity();
    updated.severity = Severity::Moderate;
    fx.engine.update_assessment(updated.clone()).await.unwrap();

    let contact = fx
        .engine
        .save_contact(ContactDraft::new("Alex", "555"))
        .await
        .unwrap()
        .into_entity();
    fx.engine.remove_contact(&contact.id).await.unwrap();
    fx.engine.save_chat_message(&updated.id, "q", "a").await.unwrap();
    fx.engine.chat_messages(&updated.id).await.unwrap();
    fx.engine.load_user_data().await.unwrap();

    assert_eq!(fx.remote.calls(), 0);
}

// ============================================================================
// Update consistency
// ============================================================================

#[tokio::test]
async fn test_update_keeps_current_and_history_equal() {
    let fx = authenticated("u1", MemoryRemoteStore::new()).await;
    let a = fx
        .engine
        .save_assessment(assessment("a1", 10))
        .await
        .unwrap()
        .into_entity();

    let mut follow_up = a.clone();
    follow_up.severity = Severity::Critical;
    follow_up.next_steps = vec!["call emergency services".into()];
    fx.engine.update_assessment(follow_up.clone()).await.unwrap();

    let snapshot = fx.engine.snapshot();
    assert_eq!(snapshot.current_assessment.as_ref(), Some(&follow_up));
    assert_eq!(snapshot.assessment(&a.id), Some(&follow_up));
    assert_eq!(fx.scope("u1").get::<Assessment>(&a.id).unwrap(), Some(follow_up));
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_guest_contact_gets_an_id() {
    let fx = guest().await;
    let contact = fx
        .engine
        .save_contact(ContactDraft::new("Alex", "555-1111"))
        .await
        .unwrap()
        .into_entity();

    assert!(!contact.id.is_unassigned());
    assert_eq!(fx.local.list::<Contact>().unwrap(), vec![contact.clone()]);
    assert_eq!(fx.engine.snapshot().contact_list(), vec![contact]);
}

#[tokio::test]
async fn test_rejected_remote_write_still_succeeds_locally() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let remote = MemoryRemoteStore::new();
    remote.set_write_failure(FailureMode::Rejected);
    let fx = authenticated("u1", remote).await;

    let a = assessment("a1", 10);
    let out = fx.engine.save_assessment(a.clone()).await.unwrap();

    assert!(matches!(out.remote_error(), Some(RemoteError::Rejected(_))));
    assert_eq!(fx.engine.snapshot().assessment(&a.id), Some(&a));

    let logs = capture.contents();
    assert!(logs.contains("ERROR"), "logs: {logs}");
    assert!(logs.contains("remote rejected"), "logs: {logs}");
}

#[tokio::test(start_paused = true)]
async fn test_load_waits_for_slow_identity() {
    let remote = MemoryRemoteStore::new();
    remote.seed(&UserId::new("u1"), assessment("r1", 10).into_record());
    let fx = build(
        MemoryAuthProvider::new()
            .with_session("u1")
            .with_restore_delay(Duration::from_millis(300)),
        remote,
        SyncConfig::default(),
    );

    let resolver = fx.identity.clone();
    tokio::spawn(async move { resolver.resolve().await });

    let report = fx.engine.load_user_data().await.unwrap();
    assert_eq!(report.identity, Identity::authenticated("u1"));
    assert!(report.fully_remote());
    assert_eq!(fx.remote.lists(), 2);
    assert_eq!(history_ids(&fx.engine), vec!["r1"]);
}

#[tokio::test(start_paused = true)]
async fn test_load_fails_fast_when_identity_never_resolves() {
    let config = SyncConfig {
        identity_timeout_ms: 500,
        ..SyncConfig::default()
    };
    let fx = build(MemoryAuthProvider::new().with_session("u1"), MemoryRemoteStore::new(), config);

    let err = fx.engine.load_user_data().await.unwrap_err();
    assert!(matches!(err, SyncError::IdentityUnresolved { timeout_ms: 500 }));
    assert_eq!(fx.remote.calls(), 0);
}

#[tokio::test]
async fn test_writes_before_resolution_stay_local() {
    let fx = build(
        MemoryAuthProvider::new().with_session("u1"),
        MemoryRemoteStore::new(),
        SyncConfig::default(),
    );
    let out = fx.engine.save_assessment(Assessment::new("early")).await.unwrap();
    assert_eq!(out.remote, RemoteOutcome::Skipped(SkipReason::Unresolved));
    assert_eq!(fx.remote.calls(), 0);
    assert!(fx.local.contains::<Assessment>(&out.entity.id).unwrap());
}
