//! In-memory remote store.
//!
//! Behaves like a hosted table store with row-level ownership: every row
//! belongs to one user, and an owner only ever sees their own rows. Used for
//! tests and local demos, so it also supports failure injection, per-owner
//! gating (to hold a fetch in flight), and call counting.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use chiron_types::{EntityId, EntityKind, Record, UserId};

use super::{RemoteError, RemoteResult, RemoteStore};

/// Injected failure behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    None,
    Unavailable,
    Rejected,
}

impl FailureMode {
    fn check(self, op: &str) -> RemoteResult<()> {
        match self {
            FailureMode::None => Ok(()),
            FailureMode::Unavailable => Err(RemoteError::unavailable(format!("{op}: network unreachable"))),
            FailureMode::Rejected => Err(RemoteError::rejected(format!("{op}: permission denied"))),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    owner: UserId,
    record: Record,
    /// Insertion sequence, tie-breaker for equal creation times.
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<StoredRow>,
    profiles: HashSet<UserId>,
    next_seq: u64,
    next_server_id: u64,
    server_assigned: HashSet<EntityKind>,
    read_failure: FailureMode,
    write_failure: FailureMode,
    gates: HashMap<UserId, watch::Receiver<bool>>,
    latency: Option<Duration>,
}

/// Per-operation call counters.
#[derive(Debug, Default)]
struct Counters {
    writes: AtomicUsize,
    deletes: AtomicUsize,
    lists: AtomicUsize,
    gets: AtomicUsize,
    profiles: AtomicUsize,
}

/// Holds list calls for one owner until released (or dropped).
pub struct OwnerGate {
    tx: watch::Sender<bool>,
}

impl OwnerGate {
    /// Let held and future calls proceed.
    pub fn release(&self) {
        let _ = self.tx.send(true);
    }
}

/// In-memory remote store with row ownership.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
    counters: Counters,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Have the store assign its own ids for `kind`, ignoring client ids on
    /// insert (like a table with a server-generated primary key).
    pub fn with_server_ids(self, kind: EntityKind) -> Self {
        self.inner.lock().server_assigned.insert(kind);
        self
    }

    /// Fail every operation with the given mode.
    pub fn set_failure(&self, mode: FailureMode) {
        let mut inner = self.inner.lock();
        inner.read_failure = mode;
        inner.write_failure = mode;
    }

    /// Fail only writes and deletes; lists and gets still succeed.
    pub fn set_write_failure(&self, mode: FailureMode) {
        self.inner.lock().write_failure = mode;
    }

    /// Fail only lists and gets.
    pub fn set_read_failure(&self, mode: FailureMode) {
        self.inner.lock().read_failure = mode;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().latency = latency;
    }

    /// Hold `list_by_owner` calls for `owner` until the returned gate is released.
    pub fn hold_owner(&self, owner: &UserId) -> OwnerGate {
        let (tx, rx) = watch::channel(false);
        self.inner.lock().gates.insert(owner.clone(), rx);
        OwnerGate { tx }
    }

    /// Insert a row directly, bypassing failure injection and counters.
    pub fn seed(&self, owner: &UserId, record: Record) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.rows.push(StoredRow {
            owner: owner.clone(),
            record,
            seq,
        });
    }

    /// Rows currently stored for `owner` and `kind`, newest first.
    pub fn rows(&self, kind: EntityKind, owner: &UserId) -> Vec<Record> {
        Self::select(&self.inner.lock(), kind, owner)
    }

    pub fn has_profile(&self, owner: &UserId) -> bool {
        self.inner.lock().profiles.contains(owner)
    }

    /// Total number of adapter calls made through the trait.
    pub fn calls(&self) -> usize {
        self.writes() + self.deletes() + self.lists() + self.gets() + self.profile_calls()
    }

    pub fn writes(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.counters.lists.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.counters.gets.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> usize {
        self.counters.profiles.load(Ordering::SeqCst)
    }

    fn select(inner: &Inner, kind: EntityKind, owner: &UserId) -> Vec<Record> {
        let mut rows: Vec<&StoredRow> = inner
            .rows
            .iter()
            .filter(|r| r.record.kind() == kind && &r.owner == owner)
            .collect();
        rows.sort_by(|a, b| {
            b.record
                .created_at()
                .cmp(&a.record.created_at())
                .then(b.seq.cmp(&a.seq))
        });
        rows.into_iter().map(|r| r.record.clone()).collect()
    }

    async fn simulate_latency(&self) {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn wait_for_gate(&self, owner: &UserId) {
        let gate = self.inner.lock().gates.get(owner).cloned();
        if let Some(mut rx) = gate {
            // A dropped gate counts as released.
            let _ = rx.wait_for(|open| *open).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create_or_update(&self, mut record: Record, owner: &UserId) -> RemoteResult<EntityId> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut inner = self.inner.lock();
        inner.write_failure.check("create_or_update")?;

        let kind = record.kind();
        let existing = inner
            .rows
            .iter()
            .position(|r| r.record.kind() == kind && r.record.id() == record.id());

        match existing {
            Some(idx) if inner.rows[idx].owner != *owner => Err(RemoteError::rejected(format!(
                "{} {} belongs to another user",
                kind,
                record.id()
            ))),
            Some(idx) => {
                let id = record.id().clone();
                inner.rows[idx].record = record;
                Ok(id)
            }
            None => {
                if record.id().is_unassigned() || inner.server_assigned.contains(&kind) {
                    inner.next_server_id += 1;
                    let id = EntityId::new(format!("srv-{}", inner.next_server_id));
                    record.set_id(id);
                }
                let id = record.id().clone();
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.rows.push(StoredRow {
                    owner: owner.clone(),
                    record,
                    seq,
                });
                Ok(id)
            }
        }
    }

    async fn delete(&self, kind: EntityKind, id: &EntityId, owner: &UserId) -> RemoteResult<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut inner = self.inner.lock();
        inner.write_failure.check("delete")?;
        inner
            .rows
            .retain(|r| !(r.record.kind() == kind && r.record.id() == id && &r.owner == owner));
        Ok(())
    }

    async fn list_by_owner(&self, kind: EntityKind, owner: &UserId) -> RemoteResult<Vec<Record>> {
        self.counters.lists.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.wait_for_gate(owner).await;

        let inner = self.inner.lock();
        inner.read_failure.check("list_by_owner")?;
        Ok(Self::select(&inner, kind, owner))
    }

    async fn get(
        &self,
        kind: EntityKind,
        id: &EntityId,
        owner: &UserId,
    ) -> RemoteResult<Option<Record>> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let inner = self.inner.lock();
        inner.read_failure.check("get")?;
        Ok(Self::select(&inner, kind, owner)
            .into_iter()
            .find(|r| r.id() == id))
    }

    async fn ensure_profile(&self, owner: &UserId, _email: Option<&str>) -> RemoteResult<()> {
        self.counters.profiles.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        inner.write_failure.check("ensure_profile")?;
        inner.profiles.insert(owner.clone());
        Ok(())
    }
}
