//! Typed local collections.
//!
//! Each entity kind lives in one collection document holding the full ordered
//! array. Every mutation is a read-modify-write of that whole snapshot, so
//! writers to the same collection are serialized by a per-collection lock.
//! Different collections never block each other.
//!
//! A store is scoped to one owner. The device scope (no owner) holds guest
//! and signed-out data under the plain collection names. A signed-in user's
//! collections are keyed `<collection>:<user id>`, so data cached for one
//! account is never read under another identity. All scopes share one
//! backend and one set of locks; the guest flag is device-wide.
//!
//! ```text
//!   put / remove / reassign
//!          │
//!          ▼
//!   lock(collection) ── read doc ── decode Vec<T> ── mutate ── encode ── write doc
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace};

use chiron_types::{Entity, EntityId, EntityKind, Placement, UserId};

use crate::backend::{LocalBackend, MemoryBackend, SqliteBackend};
use crate::error::{LocalResult, LocalStoreError};

/// Key of the persisted guest-mode flag. Present with value `"true"` or absent.
pub const GUEST_MODE_KEY: &str = "guestMode";

/// Serializes read-modify-write cycles per collection.
#[derive(Default)]
struct CollectionLocks {
    assessments: Mutex<()>,
    contacts: Mutex<()>,
    chat_messages: Mutex<()>,
}

impl CollectionLocks {
    fn for_kind(&self, kind: EntityKind) -> &Mutex<()> {
        match kind {
            EntityKind::Assessment => &self.assessments,
            EntityKind::Contact => &self.contacts,
            EntityKind::ChatMessage => &self.chat_messages,
        }
    }
}

/// Durable, synchronous entity storage on the device.
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn LocalBackend>,
    locks: Arc<CollectionLocks>,
    owner: Option<UserId>,
}

impl LocalStore {
    /// Wrap an existing backend.
    pub fn with_backend(backend: Arc<dyn LocalBackend>) -> Self {
        Self {
            backend,
            locks: Arc::new(CollectionLocks::default()),
            owner: None,
        }
    }

    /// Open (or create) a SQLite-backed store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> LocalResult<Self> {
        Ok(Self::with_backend(Arc::new(SqliteBackend::open(path)?)))
    }

    /// A fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    /// The same store, scoped to `owner` (`None` is the device scope).
    pub fn for_owner(&self, owner: Option<&UserId>) -> Self {
        Self {
            backend: self.backend.clone(),
            locks: self.locks.clone(),
            owner: owner.cloned(),
        }
    }

    pub fn owner(&self) -> Option<&UserId> {
        self.owner.as_ref()
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn LocalBackend> {
        &self.backend
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The whole collection, in stored order.
    pub fn list<T: Entity>(&self) -> LocalResult<Vec<T>> {
        self.read_collection::<T>()
    }

    /// One entity by id.
    pub fn get<T: Entity>(&self, id: &EntityId) -> LocalResult<Option<T>> {
        Ok(self
            .read_collection::<T>()?
            .into_iter()
            .find(|e| e.id() == id))
    }

    /// True if an entity with this id is stored.
    pub fn contains<T: Entity>(&self, id: &EntityId) -> LocalResult<bool> {
        Ok(self.get::<T>(id)?.is_some())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace one entity.
    ///
    /// An existing entity with the same id is replaced in place; a new one is
    /// placed according to the kind's [`Placement`].
    pub fn put<T: Entity>(&self, entity: &T) -> LocalResult<()> {
        self.modify::<T, _>(|items| upsert(items, entity.clone()))
    }

    /// Upsert many entities in a single snapshot write.
    pub fn put_all<T: Entity>(&self, entities: &[T]) -> LocalResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        self.modify::<T, _>(|items| {
            for entity in entities {
                upsert(items, entity.clone());
            }
        })
    }

    /// Remove one entity. Returns whether it was present.
    pub fn remove<T: Entity>(&self, id: &EntityId) -> LocalResult<bool> {
        self.modify::<T, _>(|items| {
            let before = items.len();
            items.retain(|e| e.id() != id);
            items.len() != before
        })
    }

    /// Replace the entity stored under `old_id` with `entity` (which carries
    /// its new canonical id), keeping its position.
    pub fn reassign<T: Entity>(&self, old_id: &EntityId, entity: &T) -> LocalResult<()> {
        self.modify::<T, _>(|items| {
            items.retain(|e| e.id() != entity.id());
            match items.iter().position(|e| e.id() == old_id) {
                Some(idx) => items[idx] = entity.clone(),
                None => upsert(items, entity.clone()),
            }
        })
    }

    /// Overwrite the whole collection.
    pub fn replace_all<T: Entity>(&self, entities: &[T]) -> LocalResult<()> {
        let _guard = self.locks.for_kind(T::KIND).lock();
        self.write_collection(T::KIND, entities)
    }

    // =========================================================================
    // Guest flag
    // =========================================================================

    /// Whether the user chose "continue as guest" in an earlier session.
    pub fn guest_mode(&self) -> LocalResult<bool> {
        Ok(self.backend.read(GUEST_MODE_KEY)?.as_deref() == Some("true"))
    }

    /// Persist (`true`) or clear (`false`) the guest-mode flag.
    pub fn set_guest_mode(&self, enabled: bool) -> LocalResult<()> {
        if enabled {
            self.backend.write(GUEST_MODE_KEY, "true")
        } else {
            self.backend.delete(GUEST_MODE_KEY)
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn modify<T: Entity, R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> LocalResult<R> {
        let _guard = self.locks.for_kind(T::KIND).lock();
        let mut items = self.read_collection::<T>()?;
        let result = f(&mut items);
        self.write_collection(T::KIND, &items)?;
        Ok(result)
    }

    fn key(&self, kind: EntityKind) -> String {
        match &self.owner {
            None => kind.collection().to_string(),
            Some(owner) => format!("{}:{owner}", kind.collection()),
        }
    }

    fn read_collection<T: Entity>(&self) -> LocalResult<Vec<T>> {
        let collection = T::KIND.collection();
        let Some(body) = self.backend.read(&self.key(T::KIND))? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&body).map_err(|e| {
            error!(collection, owner = ?self.owner, error = %e, "stored collection is corrupt");
            LocalStoreError::Corrupt {
                collection,
                reason: e.to_string(),
            }
        })
    }

    fn write_collection<T: Entity>(&self, kind: EntityKind, items: &[T]) -> LocalResult<()> {
        let key = self.key(kind);
        let body = serde_json::to_string(items)?;
        self.backend.write(&key, &body).inspect_err(|e| {
            error!(collection = %key, error = %e, "local collection write failed");
        })?;
        trace!(collection = %key, count = items.len(), "collection snapshot written");
        Ok(())
    }
}

/// Replace by id, or insert according to placement.
fn upsert<T: Entity>(items: &mut Vec<T>, entity: T) {
    if let Some(existing) = items.iter_mut().find(|e| e.id() == entity.id()) {
        *existing = entity;
        return;
    }
    let at = match T::PLACEMENT {
        Placement::NewestFirst => items
            .iter()
            .position(|e| e.created_at() <= entity.created_at())
            .unwrap_or(items.len()),
        Placement::OldestFirst => items
            .iter()
            .position(|e| e.created_at() > entity.created_at())
            .unwrap_or(items.len()),
        Placement::Append => items.len(),
    };
    items.insert(at, entity);
}
