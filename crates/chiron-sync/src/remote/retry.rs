//! Optional retry wrapper for remote adapters.
//!
//! The sync engine makes exactly one remote attempt per operation. Deployments
//! that want retries wrap their adapter in [`RetryingRemote`] instead, which
//! keeps the engine's single-attempt semantics intact: from the engine's view
//! it is still one call that either succeeds or fails.
//!
//! Only `Unavailable` failures are retried. A per-attempt timeout, when set,
//! turns a hung call into `Unavailable`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chiron_types::{EntityId, EntityKind, Record, UserId};

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::constants::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};

/// Retry behavior for [`RetryingRemote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retries.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Give up on a single attempt after this long.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF.as_millis() as u64,
            max_backoff_ms: DEFAULT_MAX_BACKOFF.as_millis() as u64,
            attempt_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// No retries, no timeout.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Backoff before retry number `retry` (1-based), doubling and capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// Wraps an adapter with a [`RetryPolicy`].
pub struct RetryingRemote<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: RemoteStore> RetryingRemote<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match self.policy.attempt_timeout() {
                Some(limit) => match tokio::time::timeout(limit, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::unavailable(format!(
                        "{op} timed out after {}ms",
                        limit.as_millis()
                    ))),
                },
                None => call().await,
            };

            match result {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(op, attempt, max_attempts = attempts, delay_ms = delay.as_millis() as u64, error = %e, "remote call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(op, attempt, error = %e, "remote call failed, giving up");
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}

#[async_trait]
impl<R: RemoteStore> RemoteStore for RetryingRemote<R> {
    async fn create_or_update(&self, record: Record, owner: &UserId) -> RemoteResult<EntityId> {
        self.run("create_or_update", || {
            self.inner.create_or_update(record.clone(), owner)
        })
        .await
    }

    async fn delete(&self, kind: EntityKind, id: &EntityId, owner: &UserId) -> RemoteResult<()> {
        self.run("delete", || self.inner.delete(kind, id, owner)).await
    }

    async fn list_by_owner(&self, kind: EntityKind, owner: &UserId) -> RemoteResult<Vec<Record>> {
        self.run("list_by_owner", || self.inner.list_by_owner(kind, owner))
            .await
    }

    async fn get(
        &self,
        kind: EntityKind,
        id: &EntityId,
        owner: &UserId,
    ) -> RemoteResult<Option<Record>> {
        self.run("get", || self.inner.get(kind, id, owner)).await
    }

    async fn ensure_profile(&self, owner: &UserId, email: Option<&str>) -> RemoteResult<()> {
        self.run("ensure_profile", || self.inner.ensure_profile(owner, email))
            .await
    }
}
