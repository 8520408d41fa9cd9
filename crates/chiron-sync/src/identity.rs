//! Identity resolution.
//!
//! [`IdentityResolver`] owns the current [`Identity`] and publishes it on a
//! `watch` channel. It starts as `Unknown` and unresolved; [`resolve`] asks
//! the [`AuthProvider`] for a stored session and checks the persisted guest
//! flag, then marks resolution complete.
//!
//! Every identity change bumps a generation counter. Work started under one
//! generation captures a [`GenerationFence`] and checks it before publishing
//! results, so data fetched for identity A never lands in identity B's state.
//!
//! [`resolve`]: IdentityResolver::resolve

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use chiron_store::LocalStore;
use chiron_types::{Identity, UserId};

use crate::error::AuthError;
use crate::remote::RemoteStore;

// ============================================================================
// Auth provider seam
// ============================================================================

/// External authentication provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The session persisted by the provider, if any.
    async fn restore_session(&self) -> Result<Option<UserId>, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserId, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<UserId, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

#[derive(Default)]
struct AuthInner {
    /// email → (password, user id)
    users: HashMap<String, (String, UserId)>,
    session: Option<UserId>,
}

/// In-memory auth provider for tests and offline builds.
#[derive(Default)]
pub struct MemoryAuthProvider {
    inner: Mutex<AuthInner>,
    restore_delay: Option<Duration>,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user up front.
    pub fn with_user(self, email: &str, password: &str, user_id: impl Into<UserId>) -> Self {
        self.inner
            .lock()
            .users
            .insert(email.to_string(), (password.to_string(), user_id.into()));
        self
    }

    /// Start with a stored session for `user_id`.
    pub fn with_session(self, user_id: impl Into<UserId>) -> Self {
        self.inner.lock().session = Some(user_id.into());
        self
    }

    /// Delay `restore_session` to simulate a slow provider.
    pub fn with_restore_delay(mut self, delay: Duration) -> Self {
        self.restore_delay = Some(delay);
        self
    }

    pub fn session(&self) -> Option<UserId> {
        self.inner.lock().session.clone()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn restore_session(&self) -> Result<Option<UserId>, AuthError> {
        if let Some(delay) = self.restore_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.inner.lock().session.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let mut inner = self.inner.lock();
        let user_id = match inner.users.get(email) {
            Some((stored, user_id)) if stored == password => user_id.clone(),
            _ => return Err(AuthError::InvalidCredentials),
        };
        inner.session = Some(user_id.clone());
        Ok(user_id)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let mut inner = self.inner.lock();
        if inner.users.contains_key(email) {
            return Err(AuthError::provider("user already registered"));
        }
        let user_id = UserId::new(format!("user-{}", inner.users.len() + 1));
        inner
            .users
            .insert(email.to_string(), (password.to_string(), user_id.clone()));
        inner.session = Some(user_id.clone());
        Ok(user_id)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.lock().session = None;
        Ok(())
    }
}

// ============================================================================
// Generation fence
// ============================================================================

/// Captures the identity generation at the start of some work.
///
/// `is_current()` turns false as soon as the identity changes.
#[derive(Clone, Debug)]
pub struct GenerationFence {
    counter: Arc<AtomicU64>,
    expected: u64,
}

impl GenerationFence {
    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.expected
    }

    pub fn generation(&self) -> u64 {
        self.expected
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Snapshot published to identity subscribers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdentityState {
    pub identity: Identity,
    /// False until the initial resolution finished.
    pub resolved: bool,
    pub generation: u64,
}

struct ResolverInner {
    auth: Arc<dyn AuthProvider>,
    local: LocalStore,
    remote: Arc<dyn RemoteStore>,
    tx: watch::Sender<IdentityState>,
    generation: Arc<AtomicU64>,
}

/// Owns the current identity mode.
#[derive(Clone)]
pub struct IdentityResolver {
    inner: Arc<ResolverInner>,
}

impl IdentityResolver {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let (tx, _rx) = watch::channel(IdentityState::default());
        Self {
            inner: Arc::new(ResolverInner {
                auth,
                local,
                remote,
                tx,
                generation: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Initial resolution: a restored provider session wins, then the
    /// persisted guest flag, else `Unknown`.
    ///
    /// Provider and flag-read failures degrade to `Unknown` rather than
    /// failing; the user is simply asked again.
    pub async fn resolve(&self) -> Identity {
        let identity = match self.inner.auth.restore_session().await {
            Ok(Some(user_id)) => Identity::Authenticated { user_id },
            Ok(None) => self.guest_or_unknown(),
            Err(e) => {
                warn!(error = %e, "session restore failed");
                self.guest_or_unknown()
            }
        };
        info!(identity = %identity, "identity resolved");
        self.publish(identity.clone(), true);
        identity
    }

    /// The current mode. `Unknown` until resolution completes.
    pub fn current(&self) -> Identity {
        self.inner.tx.borrow().identity.clone()
    }

    pub fn state(&self) -> IdentityState {
        self.inner.tx.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.tx.borrow().resolved
    }

    /// Wait until the initial resolution completes. `false` on timeout.
    pub async fn wait_resolved(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.tx.subscribe();
        let wait = rx.wait_for(|state| state.resolved);
        matches!(tokio::time::timeout(timeout, wait).await, Ok(Ok(_)))
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.inner.tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// A fence for the current generation.
    pub fn fence(&self) -> GenerationFence {
        GenerationFence {
            counter: self.inner.generation.clone(),
            expected: self.generation(),
        }
    }

    /// Identity and a fence captured together.
    pub fn snapshot(&self) -> (IdentityState, GenerationFence) {
        let state = self.inner.tx.borrow().clone();
        let fence = GenerationFence {
            counter: self.inner.generation.clone(),
            expected: state.generation,
        };
        (state, fence)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Continue without an account. Sticky across restarts.
    pub fn continue_as_guest(&self) -> Result<(), AuthError> {
        self.inner.local.set_guest_mode(true)?;
        self.publish(Identity::Guest, true);
        Ok(())
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let user_id = self.inner.auth.sign_in(email, password).await?;
        self.clear_guest_flag();
        self.publish(Identity::authenticated(user_id.clone()), true);
        Ok(user_id)
    }

    /// Register and sign in, then create the remote profile row.
    ///
    /// A profile failure is logged and does not fail the sign-up.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let user_id = self.inner.auth.sign_up(email, password).await?;
        if let Err(e) = self.inner.remote.ensure_profile(&user_id, Some(email)).await {
            warn!(user = %user_id, error = %e, "profile creation failed");
        }
        self.clear_guest_flag();
        self.publish(Identity::authenticated(user_id.clone()), true);
        Ok(user_id)
    }

    /// Sign out and return to `Unknown`, clearing the guest flag.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.auth.sign_out().await?;
        self.clear_guest_flag();
        self.publish(Identity::Unknown, true);
        Ok(())
    }

    /// Forward a provider-side session change (token expiry, another tab
    /// signing in). Resets guest mode for this session.
    pub fn on_auth_state_changed(&self, user_id: Option<UserId>) {
        let identity = match user_id {
            Some(user_id) => Identity::Authenticated { user_id },
            None => Identity::Unknown,
        };
        self.publish(identity, true);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn guest_or_unknown(&self) -> Identity {
        match self.inner.local.guest_mode() {
            Ok(true) => Identity::Guest,
            Ok(false) => Identity::Unknown,
            Err(e) => {
                warn!(error = %e, "guest flag unreadable, treating as unset");
                Identity::Unknown
            }
        }
    }

    fn clear_guest_flag(&self) {
        if let Err(e) = self.inner.local.set_guest_mode(false) {
            warn!(error = %e, "failed to clear guest flag");
        }
    }

    /// Publish `identity`. Bumps the generation only when the mode or owner
    /// actually changed.
    fn publish(&self, identity: Identity, resolved: bool) {
        let generation = &self.inner.generation;
        self.inner.tx.send_if_modified(|state| {
            let identity_changed = state.identity != identity;
            if !identity_changed && state.resolved == resolved {
                return false;
            }
            if identity_changed {
                state.generation = generation.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(from = %state.identity, to = %identity, generation = state.generation, "identity changed");
                state.identity = identity;
            }
            state.resolved = resolved;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;

    fn resolver(auth: MemoryAuthProvider) -> (IdentityResolver, LocalStore, Arc<MemoryRemoteStore>) {
        let local = LocalStore::in_memory();
        let remote = Arc::new(MemoryRemoteStore::new());
        let resolver = IdentityResolver::new(Arc::new(auth), local.clone(), remote.clone());
        (resolver, local, remote)
    }

    #[tokio::test]
    async fn test_starts_unknown_and_unresolved() {
        let (resolver, _, _) = resolver(MemoryAuthProvider::new());
        assert_eq!(resolver.current(), Identity::Unknown);
        assert!(!resolver.is_resolved());
        assert_eq!(resolver.resolve().await, Identity::Unknown);
        assert!(resolver.is_resolved());
    }

    #[tokio::test]
    async fn test_restored_session_resolves_authenticated() {
        let (resolver, _, _) = resolver(MemoryAuthProvider::new().with_session("u1"));
        assert_eq!(resolver.resolve().await, Identity::authenticated("u1"));
    }

    #[tokio::test]
    async fn test_guest_flag_is_sticky() {
        let (resolver, local, remote) = resolver(MemoryAuthProvider::new());
        resolver.continue_as_guest().unwrap();
        assert!(local.guest_mode().unwrap());

        // A fresh resolver over the same local store, as after a restart.
        let restarted = IdentityResolver::new(Arc::new(MemoryAuthProvider::new()), local, remote);
        assert_eq!(restarted.resolve().await, Identity::Guest);
    }

    #[tokio::test]
    async fn test_sign_out_clears_guest_flag() {
        let (resolver, local, _) =
            resolver(MemoryAuthProvider::new().with_user("a@b.c", "pw", "u1"));
        resolver.continue_as_guest().unwrap();
        resolver.sign_in("a@b.c", "pw").await.unwrap();
        assert!(!local.guest_mode().unwrap());
        assert_eq!(resolver.current(), Identity::authenticated("u1"));

        resolver.sign_out().await.unwrap();
        assert_eq!(resolver.current(), Identity::Unknown);
        assert!(!local.guest_mode().unwrap());
    }

    #[tokio::test]
    async fn test_bad_credentials_leave_identity_alone() {
        let (resolver, _, _) =
            resolver(MemoryAuthProvider::new().with_user("a@b.c", "pw", "u1"));
        resolver.continue_as_guest().unwrap();
        let err = resolver.sign_in("a@b.c", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(resolver.current(), Identity::Guest);
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile() {
        let (resolver, _, remote) = resolver(MemoryAuthProvider::new());
        let user_id = resolver.sign_up("new@b.c", "pw").await.unwrap();
        assert!(remote.has_profile(&user_id));
        assert!(resolver.current().is_authenticated());
    }

    #[tokio::test]
    async fn test_generation_bumps_on_change_only() {
        let (resolver, _, _) = resolver(MemoryAuthProvider::new());
        resolver.resolve().await;
        let start = resolver.generation();
        let fence = resolver.fence();

        resolver.on_auth_state_changed(None);
        assert_eq!(resolver.generation(), start);
        assert!(fence.is_current());

        resolver.on_auth_state_changed(Some(UserId::new("u1")));
        assert_eq!(resolver.generation(), start + 1);
        assert!(!fence.is_current());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolved_times_out() {
        let (resolver, _, _) = resolver(MemoryAuthProvider::new());
        assert!(!resolver.wait_resolved(Duration::from_millis(100)).await);

        let background = resolver.clone();
        tokio::spawn(async move { background.resolve().await });
        assert!(resolver.wait_resolved(Duration::from_secs(1)).await);
    }
}
