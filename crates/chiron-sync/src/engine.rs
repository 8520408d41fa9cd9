//! The sync engine: where every mutation is written, in what order, and how
//! remote failures are absorbed.
//!
//! Write path for one entity:
//!
//! ```text
//!   mint id (if unassigned)
//!        │
//!        ▼
//!   LocalStore::put ──── Err ──▶ SyncError::Local (nothing else happens)
//!        │ Ok
//!        ▼
//!   identity Authenticated? ── no ──▶ RemoteOutcome::Skipped
//!        │ yes
//!        ▼
//!   RemoteStore::create_or_update ── Err ──▶ log, RemoteOutcome::Failed
//!        │ Ok(canonical id)
//!        ▼
//!   re-key locally if the id changed, RemoteOutcome::Synced
//!        │
//!        ▼  (every branch above except the local error)
//!   StateHandle::dispatch_fenced(transition)
//! ```
//!
//! The local write always lands before the remote attempt starts and before
//! the state actor sees the transition, so anything visible in [`AppState`]
//! is already durable on the device. A remote failure never rolls anything
//! back.
//!
//! Each operation captures the identity once. That snapshot picks the local
//! scope (the signed-in user's own collections, or the device scope for guest
//! and signed-out sessions), the remote owner, and a [`GenerationFence`].
//! Transitions are dispatched fenced: if the identity changes before they are
//! applied, they are dropped. Hydration (`load_user_data`) additionally waits
//! for identity resolution before reading anything.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chiron_store::LocalStore;
use chiron_types::{
    Assessment, ChatMessage, Contact, ContactDraft, Entity, EntityId, EntityKind, Identity, UserId,
};

use crate::actor::{ApplyOutcome, StateHandle, spawn_state_actor};
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::identity::{GenerationFence, IdentityResolver};
use crate::outcome::{
    HydrationReport, MutationOutcome, RemoteOutcome, SkipReason, SliceReport, SliceSource,
};
use crate::remote::{RemoteError, RemoteStore};
use crate::state::{AppState, Transition};

struct EngineInner {
    local: LocalStore,
    remote: Arc<dyn RemoteStore>,
    identity: IdentityResolver,
    connectivity: ConnectivityMonitor,
    state: StateHandle,
    config: SyncConfig,
}

/// Orchestrates the local store, the remote store, and app state.
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

/// One hydrated slice before it is dispatched.
struct SliceLoad<T> {
    items: Option<Vec<T>>,
    report: SliceReport,
}

/// Where one operation goes. Captured once so the local scope, the remote
/// owner and the fence all describe the same identity.
struct Route {
    local: LocalStore,
    target: Result<UserId, SkipReason>,
    fence: GenerationFence,
    mode: &'static str,
}

/// A stored entity whose transition has not been dispatched yet.
struct Written<T> {
    entity: T,
    remote: RemoteOutcome,
    /// The locally minted id, when the remote store assigned another.
    rekeyed_from: Option<EntityId>,
}

impl<T> Written<T> {
    fn into_outcome(self) -> MutationOutcome<T> {
        MutationOutcome {
            entity: self.entity,
            remote: self.remote,
        }
    }
}

impl SyncEngine {
    /// Build an engine and spawn its state actor on the current runtime.
    pub fn new(
        local: LocalStore,
        remote: Arc<dyn RemoteStore>,
        identity: IdentityResolver,
        connectivity: ConnectivityMonitor,
        config: SyncConfig,
    ) -> Self {
        let initial = AppState {
            is_offline: !connectivity.is_online(),
            ..AppState::default()
        };
        let state = spawn_state_actor(initial, config.state_event_capacity);
        Self {
            inner: Arc::new(EngineInner {
                local,
                remote,
                identity,
                connectivity,
                state,
                config,
            }),
        }
    }

    pub fn state(&self) -> &StateHandle {
        &self.inner.state
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        self.inner.state.snapshot()
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.inner.identity
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// The device-scope local store.
    pub fn local(&self) -> &LocalStore {
        &self.inner.local
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Record a new assessment and make it current.
    ///
    /// The state change is fenced to the identity the save started under. If
    /// the identity changes first, the assessment stays stored in that
    /// identity's local scope and the new session never shows it.
    pub async fn save_assessment(
        &self,
        assessment: Assessment,
    ) -> SyncResult<MutationOutcome<Assessment>> {
        let route = self.route();
        let written = self
            .write_entity(assessment, "save_assessment", &route)
            .await?;
        let transition = Transition::AddAssessment(written.entity.clone());
        self.apply_written(&route, &written, transition).await?;
        Ok(written.into_outcome())
    }

    /// Replace an existing assessment (follow-up analysis filled in fields).
    pub async fn update_assessment(
        &self,
        assessment: Assessment,
    ) -> SyncResult<MutationOutcome<Assessment>> {
        if assessment.id.is_unassigned() {
            return Err(SyncError::not_found(EntityKind::Assessment, &assessment.id));
        }
        let route = self.route();
        let written = self
            .write_entity(assessment, "update_assessment", &route)
            .await?;
        let transition = Transition::UpdateAssessment(written.entity.clone());
        self.apply_written(&route, &written, transition).await?;
        Ok(written.into_outcome())
    }

    /// Add an emergency contact. The returned contact carries its canonical id.
    ///
    /// Fenced like [`save_assessment`](Self::save_assessment).
    pub async fn save_contact(&self, draft: ContactDraft) -> SyncResult<MutationOutcome<Contact>> {
        let route = self.route();
        let contact = draft.into_contact(EntityId::unassigned());
        let written = self.write_entity(contact, "save_contact", &route).await?;
        let transition = Transition::AddContact(written.entity.clone());
        self.apply_written(&route, &written, transition).await?;
        Ok(written.into_outcome())
    }

    /// Delete a contact from both stores. Removing an unknown id is not an
    /// error.
    pub async fn remove_contact(&self, id: &EntityId) -> SyncResult<MutationOutcome<EntityId>> {
        let kind = EntityKind::Contact;
        let route = self.route();
        let existed = route.local.remove::<Contact>(id).inspect_err(|e| {
            error!(entity = %kind, id = %id, identity = route.mode, error = %e, "local delete failed");
        })?;
        debug!(entity = %kind, id = %id, existed, "removed locally");

        let remote = match &route.target {
            Err(reason) => self.skipped(kind, id, *reason),
            Ok(owner) => match self.inner.remote.delete(kind, id, owner).await {
                Ok(()) => RemoteOutcome::Synced,
                Err(e) => {
                    log_remote_failure(kind, id, owner, "remove_contact", &e);
                    RemoteOutcome::Failed(e)
                }
            },
        };

        self.apply_fenced(&route, Transition::RemoveContact(id.clone()))
            .await?;
        Ok(MutationOutcome {
            entity: id.clone(),
            remote,
        })
    }

    /// Store a follow-up question and answer for an assessment.
    pub async fn save_chat_message(
        &self,
        assessment_id: &EntityId,
        message: &str,
        response: &str,
    ) -> SyncResult<MutationOutcome<ChatMessage>> {
        let route = self.route();
        let msg = ChatMessage::new(assessment_id.clone(), message, response);
        let written = self
            .write_entity(msg, "save_chat_message", &route)
            .await?;
        Ok(written.into_outcome())
    }

    /// Set (or clear) the assessment the UI is focused on.
    ///
    /// An assessment not yet on the device is stored locally first.
    pub async fn set_current_assessment(&self, assessment: Option<Assessment>) -> SyncResult<()> {
        if let Some(a) = &assessment {
            let local = self.route().local;
            if !local.contains::<Assessment>(&a.id)? {
                local.put(a)?;
            }
        }
        self.apply(Transition::SetCurrent(assessment)).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Populate app state for the current identity.
    ///
    /// Waits for identity resolution (up to `identity_timeout_ms`) before
    /// touching either store. Authenticated sessions fetch history and
    /// contacts from the remote store concurrently, each slice falling back
    /// to the user's own local scope on its own. Everyone else reads the
    /// device scope only.
    pub async fn load_user_data(&self) -> SyncResult<HydrationReport> {
        let timeout = self.inner.config.identity_timeout();
        if !self.inner.identity.wait_resolved(timeout).await {
            let timeout_ms = timeout.as_millis() as u64;
            error!(timeout_ms, "identity unresolved, hydration aborted");
            return Err(SyncError::IdentityUnresolved { timeout_ms });
        }

        let (identity_state, fence) = self.inner.identity.snapshot();
        let identity = identity_state.identity;
        let local = self.inner.local.for_owner(identity.owner());

        match self.owner_for(&identity) {
            Ok(owner) => {
                self.hydrate_remote(identity.clone(), &owner, &local, fence)
                    .await
            }
            Err(reason) => {
                debug!(identity = %identity, reason = reason.as_str(), "hydrating from local store");
                self.hydrate_local(identity.clone(), &local, fence).await
            }
        }
    }

    /// Find one assessment: app state, then the device, then the remote store.
    pub async fn assessment_by_id(&self, id: &EntityId) -> SyncResult<Assessment> {
        let kind = EntityKind::Assessment;
        if let Some(a) = self.inner.state.snapshot().assessment(id) {
            return Ok(a.clone());
        }
        let route = self.route();
        if let Some(a) = route.local.get::<Assessment>(id)? {
            return Ok(a);
        }

        let owner = match &route.target {
            Ok(owner) => owner,
            Err(SkipReason::Unresolved) => {
                return Err(SyncError::IdentityUnresolved { timeout_ms: 0 });
            }
            Err(_) => return Err(SyncError::not_found(kind, id)),
        };

        let record = self
            .inner
            .remote
            .get(kind, id, owner)
            .await
            .inspect_err(|e| log_remote_failure(kind, id, owner, "assessment_by_id", e))?;
        let assessment = record
            .and_then(Assessment::from_record)
            .ok_or_else(|| SyncError::not_found(kind, id))?;

        if let Err(e) = route.local.put(&assessment) {
            warn!(entity = %kind, id = %id, error = %e, "failed to cache fetched assessment");
        }
        Ok(assessment)
    }

    /// Chat messages for an assessment, oldest first.
    pub async fn chat_messages(&self, assessment_id: &EntityId) -> SyncResult<Vec<ChatMessage>> {
        let kind = EntityKind::ChatMessage;
        let route = self.route();
        let mut messages: Vec<ChatMessage> = match &route.target {
            Ok(owner) => match self.inner.remote.list_by_owner(kind, owner).await {
                Ok(records) => records
                    .into_iter()
                    .filter_map(ChatMessage::from_record)
                    .collect(),
                Err(e) => {
                    log_remote_failure(kind, assessment_id, owner, "chat_messages", &e);
                    route.local.list::<ChatMessage>()?
                }
            },
            Err(_) => route.local.list::<ChatMessage>()?,
        };
        messages.retain(|m| &m.assessment_id == assessment_id);
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    // =========================================================================
    // Background bridges
    // =========================================================================

    /// Re-hydrate every time the identity changes (sign-in, sign-out, guest).
    ///
    /// Runs until aborted. The first run happens as soon as identity resolves.
    pub fn spawn_identity_watcher(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut rx = self.inner.identity.subscribe();
        tokio::spawn(async move {
            let mut hydrated: Option<u64> = None;
            loop {
                let current = rx.borrow_and_update().clone();
                if current.resolved && hydrated != Some(current.generation) {
                    hydrated = Some(current.generation);
                    if let Err(e) = engine.load_user_data().await {
                        warn!(identity = %current.identity, error = %e, "hydration after identity change failed");
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Mirror connectivity changes into `AppState::is_offline`.
    pub fn spawn_connectivity_bridge(&self) -> JoinHandle<()> {
        let state = self.inner.state.clone();
        let mut rx = self.inner.connectivity.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if state.dispatch(Transition::SetOffline(!online)).await.is_err() {
                    break;
                }
            }
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Capture the identity once for a whole operation.
    fn route(&self) -> Route {
        let (state, fence) = self.inner.identity.snapshot();
        let target = if state.resolved {
            self.owner_for(&state.identity)
        } else {
            Err(SkipReason::Unresolved)
        };
        Route {
            local: self.inner.local.for_owner(state.identity.owner()),
            target,
            fence,
            mode: state.identity.mode_name(),
        }
    }

    /// Local write, then at most one remote attempt. Returns the entity with
    /// its canonical id.
    async fn write_entity<T: Entity>(
        &self,
        mut entity: T,
        op: &'static str,
        route: &Route,
    ) -> SyncResult<Written<T>> {
        let kind = T::KIND;
        if entity.id().is_unassigned() {
            entity.set_id(EntityId::mint());
        }

        route.local.put(&entity).inspect_err(|e| {
            error!(entity = %kind, id = %entity.id(), identity = route.mode, op, error = %e, "local write failed");
        })?;

        let owner = match &route.target {
            Ok(owner) => owner,
            Err(reason) => {
                let remote = self.skipped(kind, entity.id(), *reason);
                return Ok(Written {
                    entity,
                    remote,
                    rekeyed_from: None,
                });
            }
        };

        match self
            .inner
            .remote
            .create_or_update(entity.clone().into_record(), owner)
            .await
        {
            Ok(canonical) => {
                let mut rekeyed_from = None;
                if &canonical != entity.id() && !canonical.is_unassigned() {
                    rekeyed_from = adopt_canonical_id(&route.local, &mut entity, canonical);
                }
                debug!(entity = %kind, id = %entity.id(), op, "synced");
                Ok(Written {
                    entity,
                    remote: RemoteOutcome::Synced,
                    rekeyed_from,
                })
            }
            Err(e) => {
                log_remote_failure(kind, entity.id(), owner, op, &e);
                Ok(Written {
                    entity,
                    remote: RemoteOutcome::Failed(e),
                    rekeyed_from: None,
                })
            }
        }
    }

    /// Dispatch a mutation's transition, first moving any state entry still
    /// under the locally minted id (a hydration may have loaded it before the
    /// re-key).
    async fn apply_written<T: Entity>(
        &self,
        route: &Route,
        written: &Written<T>,
        transition: Transition,
    ) -> SyncResult<()> {
        if let Some(from) = &written.rekeyed_from {
            let rekey = Transition::Rekey {
                kind: T::KIND,
                from: from.clone(),
                to: written.entity.id().clone(),
            };
            self.apply_fenced(route, rekey).await?;
        }
        self.apply_fenced(route, transition).await
    }

    async fn apply_fenced(&self, route: &Route, transition: Transition) -> SyncResult<()> {
        let kind = transition.kind();
        let outcome = self
            .inner
            .state
            .dispatch_fenced(transition, route.fence.clone())
            .await?;
        if outcome == ApplyOutcome::Discarded {
            info!(transition = kind, identity = route.mode, "identity changed mid-mutation, change kept on device only");
        }
        Ok(())
    }

    async fn hydrate_remote(
        &self,
        identity: Identity,
        owner: &UserId,
        local: &LocalStore,
        fence: GenerationFence,
    ) -> SyncResult<HydrationReport> {
        let (history, contacts) = tokio::join!(
            self.fetch_slice::<Assessment>(owner, local, &fence),
            self.fetch_slice::<Contact>(owner, local, &fence),
        );

        let history_applied = self
            .inner
            .state
            .dispatch_fenced(
                Transition::SetHistory(history.items.unwrap_or_default()),
                fence.clone(),
            )
            .await?;
        let contacts_applied = self
            .inner
            .state
            .dispatch_fenced(
                Transition::SetContacts(contacts.items.unwrap_or_default()),
                fence,
            )
            .await?;

        let report = HydrationReport {
            identity,
            assessments: history.report,
            contacts: contacts.report,
            applied: history_applied == ApplyOutcome::Applied
                && contacts_applied == ApplyOutcome::Applied,
        };
        log_hydration(&report);
        Ok(report)
    }

    async fn hydrate_local(
        &self,
        identity: Identity,
        local: &LocalStore,
        fence: GenerationFence,
    ) -> SyncResult<HydrationReport> {
        let history = read_local_slice::<Assessment>(local, None);
        let contacts = read_local_slice::<Contact>(local, None);

        let applied = self
            .inner
            .state
            .dispatch_fenced(
                Transition::Hydrate {
                    assessment_history: history.items,
                    contacts: contacts.items,
                },
                fence,
            )
            .await?;

        let report = HydrationReport {
            identity,
            assessments: history.report,
            contacts: contacts.report,
            applied: applied == ApplyOutcome::Applied,
        };
        log_hydration(&report);
        Ok(report)
    }

    /// Remote list for one kind, falling back to the owner's local scope.
    ///
    /// Fetched entities are upserted into that scope (while the fence holds)
    /// so that everything hydrated into app state is also on the device.
    async fn fetch_slice<T: Entity>(
        &self,
        owner: &UserId,
        local: &LocalStore,
        fence: &GenerationFence,
    ) -> SliceLoad<T> {
        let kind = T::KIND;
        let records = match self.inner.remote.list_by_owner(kind, owner).await {
            Ok(records) => records,
            Err(e) => {
                log_remote_failure(kind, &EntityId::unassigned(), owner, "load_user_data", &e);
                return read_local_slice(local, Some(e));
            }
        };

        let items: Vec<T> = records.into_iter().filter_map(T::from_record).collect();
        if fence.is_current() {
            if let Err(e) = local.put_all(&items) {
                error!(entity = %kind, owner = %owner, error = %e, "failed to mirror remote slice locally, using local data");
                return read_local_slice(local, None);
            }
        }

        SliceLoad {
            report: SliceReport {
                source: SliceSource::Remote,
                count: items.len(),
                remote_error: None,
            },
            items: Some(items),
        }
    }

    async fn apply(&self, transition: Transition) -> SyncResult<()> {
        self.inner.state.dispatch(transition).await.map(|_| ())
    }

    fn owner_for(&self, identity: &Identity) -> Result<UserId, SkipReason> {
        match identity {
            Identity::Authenticated { user_id } => {
                if self.inner.config.skip_remote_when_offline && !self.inner.connectivity.is_online() {
                    Err(SkipReason::Offline)
                } else {
                    Ok(user_id.clone())
                }
            }
            Identity::Guest => Err(SkipReason::Guest),
            Identity::Unknown => Err(SkipReason::SignedOut),
        }
    }

    fn skipped(&self, kind: EntityKind, id: &EntityId, reason: SkipReason) -> RemoteOutcome {
        debug!(entity = %kind, id = %id, reason = reason.as_str(), "remote skipped");
        RemoteOutcome::Skipped(reason)
    }
}

/// Re-key a locally stored entity to the id the remote store assigned.
/// Returns the replaced local id.
///
/// If the local re-key fails the entity keeps its local id, so app state
/// never refers to an id the device does not have.
fn adopt_canonical_id<T: Entity>(
    local: &LocalStore,
    entity: &mut T,
    canonical: EntityId,
) -> Option<EntityId> {
    let local_id = entity.id().clone();
    entity.set_id(canonical);
    match local.reassign(&local_id, entity) {
        Ok(()) => {
            debug!(entity = %T::KIND, from = %local_id, to = %entity.id(), "adopted canonical id");
            Some(local_id)
        }
        Err(e) => {
            error!(entity = %T::KIND, local_id = %local_id, canonical = %entity.id(), error = %e, "failed to re-key local entity, keeping local id");
            entity.set_id(local_id);
            None
        }
    }
}

fn read_local_slice<T: Entity>(local: &LocalStore, remote_error: Option<RemoteError>) -> SliceLoad<T> {
    match local.list::<T>() {
        Ok(items) => SliceLoad {
            report: SliceReport {
                source: SliceSource::Local,
                count: items.len(),
                remote_error,
            },
            items: Some(items),
        },
        Err(e) => {
            error!(entity = %T::KIND, error = %e, "local read failed, clearing slice");
            SliceLoad {
                report: SliceReport {
                    source: SliceSource::Cleared,
                    count: 0,
                    remote_error,
                },
                items: None,
            }
        }
    }
}

fn log_remote_failure(kind: EntityKind, id: &EntityId, owner: &UserId, op: &str, e: &RemoteError) {
    match e {
        RemoteError::Unavailable(_) => {
            warn!(entity = %kind, id = %id, identity = "authenticated", owner = %owner, op, error = %e, "remote unavailable, data is local-only");
        }
        RemoteError::Rejected(_) => {
            error!(entity = %kind, id = %id, identity = "authenticated", owner = %owner, op, error = %e, "remote rejected, data is local-only");
        }
    }
}

fn log_hydration(report: &HydrationReport) {
    if report.applied {
        info!(
            identity = %report.identity,
            assessments = report.assessments.count,
            assessments_source = ?report.assessments.source,
            contacts = report.contacts.count,
            contacts_source = ?report.contacts.source,
            "hydrated"
        );
    } else {
        info!(identity = %report.identity, "identity changed during hydration, results discarded");
    }
}
