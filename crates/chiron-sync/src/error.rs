//! Sync layer errors.
//!
//! Remote failures are *not* errors at this level: a mutation whose local
//! write succeeded returns `Ok` with the remote result folded into its
//! [`MutationOutcome`](crate::MutationOutcome). `SyncError` is reserved for
//! failures the caller must handle.

use thiserror::Error;

use chiron_store::LocalStoreError;
use chiron_types::{EntityId, EntityKind};

use crate::remote::RemoteError;

/// Errors from sync engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The on-device write failed; nothing was changed.
    #[error("local storage failed: {0}")]
    Local(#[from] LocalStoreError),

    /// Identity did not resolve before the wait timed out.
    #[error("identity not resolved after {timeout_ms}ms")]
    IdentityUnresolved { timeout_ms: u64 },

    /// A remote read with no local fallback failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The state actor is gone (runtime shutting down).
    #[error("state actor closed")]
    StateClosed,

    #[error("{0} not found: {1}")]
    NotFound(EntityKind, EntityId),
}

impl SyncError {
    pub fn not_found(kind: EntityKind, id: &EntityId) -> Self {
        Self::NotFound(kind, id.clone())
    }
}

/// Errors from the authentication provider.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("auth provider error: {0}")]
    Provider(String),

    /// Persisting the guest flag failed.
    #[error("local storage failed: {0}")]
    Local(#[from] LocalStoreError),
}

impl AuthError {
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }
}

/// Sync layer result type.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SyncError::not_found(EntityKind::Contact, &EntityId::new("c1"));
        assert_eq!(err.to_string(), "contact not found: c1");

        let err = SyncError::IdentityUnresolved { timeout_ms: 10_000 };
        assert_eq!(err.to_string(), "identity not resolved after 10000ms");

        let err: SyncError = RemoteError::rejected("nope").into();
        assert_eq!(err.to_string(), "remote rejected: nope");
    }
}
