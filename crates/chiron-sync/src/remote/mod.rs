//! Remote store capability interface.
//!
//! The adapter abstracts a network-backed store with per-user row ownership.
//! It is deliberately vendor-agnostic: one trait, three core operations, and
//! two failure classes.
//!
//! - [`RemoteError::Unavailable`]: transient (network, timeout, 5xx). A
//!   caller may retry later; the sync engine itself never does.
//! - [`RemoteError::Rejected`]: permanent (validation, permission). Never
//!   retried automatically.
//!
//! Every call takes the owner as a `&UserId`. A `UserId` is only reachable
//! through [`Identity::Authenticated`](chiron_types::Identity), so guest and
//! unknown sessions cannot issue remote calls by construction.

pub mod memory;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;

use chiron_types::{EntityId, EntityKind, Record, UserId};

pub use memory::{FailureMode, MemoryRemoteStore, OwnerGate};
pub use retry::{RetryPolicy, RetryingRemote};

/// Remote store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transient / network-class failure. Retrying later is sensible.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    /// Permanent rejection (validation, permission). Do not retry.
    #[error("remote rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// True for failures worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Remote result type.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// A network-backed store with per-user row ownership.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert or update a row owned by `owner`.
    ///
    /// Returns the canonical id. Adapters that assign their own ids return the
    /// new one; adapters that honor client ids return the record's id. An
    /// unassigned record id always gets a server-assigned id.
    async fn create_or_update(&self, record: Record, owner: &UserId) -> RemoteResult<EntityId>;

    /// Delete a row owned by `owner`. Deleting a missing row is not an error.
    async fn delete(&self, kind: EntityKind, id: &EntityId, owner: &UserId) -> RemoteResult<()>;

    /// All rows of `kind` owned by `owner`, newest first by creation time.
    async fn list_by_owner(&self, kind: EntityKind, owner: &UserId) -> RemoteResult<Vec<Record>>;

    /// One row by id, or `None` if the owner has no such row.
    async fn get(
        &self,
        kind: EntityKind,
        id: &EntityId,
        owner: &UserId,
    ) -> RemoteResult<Option<Record>> {
        Ok(self
            .list_by_owner(kind, owner)
            .await?
            .into_iter()
            .find(|r| r.id() == id))
    }

    /// Create the owner's profile row. An existing profile is not an error.
    async fn ensure_profile(&self, _owner: &UserId, _email: Option<&str>) -> RemoteResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<R: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<R> {
    async fn create_or_update(&self, record: Record, owner: &UserId) -> RemoteResult<EntityId> {
        (**self).create_or_update(record, owner).await
    }

    async fn delete(&self, kind: EntityKind, id: &EntityId, owner: &UserId) -> RemoteResult<()> {
        (**self).delete(kind, id, owner).await
    }

    async fn list_by_owner(&self, kind: EntityKind, owner: &UserId) -> RemoteResult<Vec<Record>> {
        (**self).list_by_owner(kind, owner).await
    }

    async fn get(
        &self,
        kind: EntityKind,
        id: &EntityId,
        owner: &UserId,
    ) -> RemoteResult<Option<Record>> {
        (**self).get(kind, id, owner).await
    }

    async fn ensure_profile(&self, owner: &UserId, email: Option<&str>) -> RemoteResult<()> {
        (**self).ensure_profile(owner, email).await
    }
}

/// An adapter for builds with no backend configured: every call is
/// `Unavailable`. The app stays fully usable on local storage alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedRemote;

#[async_trait]
impl RemoteStore for DetachedRemote {
    async fn create_or_update(&self, _record: Record, _owner: &UserId) -> RemoteResult<EntityId> {
        Err(RemoteError::unavailable("no remote store configured"))
    }

    async fn delete(&self, _kind: EntityKind, _id: &EntityId, _owner: &UserId) -> RemoteResult<()> {
        Err(RemoteError::unavailable("no remote store configured"))
    }

    async fn list_by_owner(&self, _kind: EntityKind, _owner: &UserId) -> RemoteResult<Vec<Record>> {
        Err(RemoteError::unavailable("no remote store configured"))
    }
}
