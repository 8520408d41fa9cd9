//! Offline-first sync layer for Chiron.
//!
//! Every mutation is written to the device first, then (for signed-in users)
//! attempted once against the remote store, and only then shown in app state.
//! Remote failures degrade an entity to local-only; they never lose it.
//!
//! # Architecture
//!
//! ```text
//!   collaborator intent
//!          │
//!          ▼
//!     SyncEngine ──── IdentityResolver (Authenticated / Guest / Unknown)
//!      │   │   │ └─── ConnectivityMonitor (online flag)
//!      │   │   ▼
//!      │   │  RemoteStore (trait; MemoryRemoteStore, RetryingRemote, DetachedRemote)
//!      │   ▼
//!      │  LocalStore (chiron-store; SQLite or memory)
//!      ▼
//!   state actor ── reduce(AppState, Transition) ──▶ watch<Arc<AppState>>
//! ```
//!
//! # Quick start
//!
//! ```ignore
//! let local = LocalStore::open(path)?;
//! let remote: Arc<dyn RemoteStore> = Arc::new(DetachedRemote);
//! let identity = IdentityResolver::new(auth, local.clone(), remote.clone());
//! let engine = SyncEngine::new(local, remote, identity.clone(), ConnectivityMonitor::default(), config);
//! engine.spawn_identity_watcher();
//! identity.resolve().await;
//! ```

pub mod actor;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod engine;
pub mod error;
pub mod identity;
pub mod outcome;
pub mod remote;
pub mod state;

pub use actor::{ApplyOutcome, StateEvent, StateHandle, spawn_state_actor};
pub use config::{ConfigError, SyncConfig};
pub use connectivity::ConnectivityMonitor;
pub use engine::SyncEngine;
pub use error::{AuthError, SyncError, SyncResult};
pub use identity::{
    AuthProvider, GenerationFence, IdentityResolver, IdentityState, MemoryAuthProvider,
};
pub use outcome::{
    HydrationReport, MutationOutcome, RemoteOutcome, SkipReason, SliceReport, SliceSource,
};
pub use remote::{
    DetachedRemote, FailureMode, MemoryRemoteStore, RemoteError, RemoteResult, RemoteStore,
    RetryPolicy, RetryingRemote,
};
pub use state::{AppState, Transition, reduce};
