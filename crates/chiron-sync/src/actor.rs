//! Single-writer owner of [`AppState`].
//!
//! The state actor is the only code that ever calls [`reduce`]. Everyone else
//! holds a cloneable [`StateHandle`] and sends transitions over an mpsc
//! channel; the actor applies them one at a time, in arrival order, and
//! publishes each new snapshot.
//!
//! ```text
//!   StateHandle (Clone)        mpsc         state actor (tokio task)
//!   ┌───────────────────┐   ─────────▶   ┌────────────────────────────┐
//!   │ .dispatch()       │                │ check fence ─ reduce ─     │
//!   │ .dispatch_fenced()│   ◀─────────   │ publish snapshot + event   │
//!   └───────────────────┘    oneshot     └────────────────────────────┘
//!            ▲                                │ watch<Arc<AppState>>
//!            └──── .snapshot() / .subscribe() ┘ broadcast<StateEvent>
//! ```
//!
//! Fenced transitions carry a [`GenerationFence`]. The actor checks it at
//! apply time, so a hydration that finished after an identity change is
//! dropped even if it was queued before the change.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, trace};

use crate::error::{SyncError, SyncResult};
use crate::identity::GenerationFence;
use crate::state::{AppState, Transition, reduce};

/// What the actor did with a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The fence was stale; state is unchanged.
    Discarded,
}

/// Emitted after every applied transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateEvent {
    pub transition: &'static str,
    /// Count of transitions applied so far, starting at 1.
    pub version: u64,
}

struct StateCommand {
    transition: Transition,
    fence: Option<GenerationFence>,
    reply: oneshot::Sender<ApplyOutcome>,
}

/// Cloneable handle to the state actor.
#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::UnboundedSender<StateCommand>,
    snapshot: watch::Receiver<Arc<AppState>>,
    events: broadcast::Sender<StateEvent>,
}

/// Spawn the state actor on the current tokio runtime.
///
/// The actor stops once every handle is dropped.
pub fn spawn_state_actor(initial: AppState, event_capacity: usize) -> StateHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<StateCommand>();
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(initial));
    let (events, _) = broadcast::channel(event_capacity.max(1));
    let event_tx = events.clone();

    tokio::spawn(async move {
        let mut version = 0u64;
        while let Some(cmd) = rx.recv().await {
            let kind = cmd.transition.kind();
            if let Some(stale) = cmd.fence.as_ref().filter(|f| !f.is_current()) {
                info!(transition = kind, generation = stale.generation(), "stale transition discarded");
                let _ = cmd.reply.send(ApplyOutcome::Discarded);
                continue;
            }

            let previous = snapshot_tx.borrow().clone();
            let next = reduce((*previous).clone(), cmd.transition);
            snapshot_tx.send_replace(Arc::new(next));

            version += 1;
            trace!(transition = kind, version, "transition applied");
            let _ = event_tx.send(StateEvent {
                transition: kind,
                version,
            });
            let _ = cmd.reply.send(ApplyOutcome::Applied);
        }
        trace!("state actor stopped");
    });

    StateHandle {
        tx,
        snapshot: snapshot_rx,
        events,
    }
}

impl StateHandle {
    /// Apply a transition unconditionally.
    pub async fn dispatch(&self, transition: Transition) -> SyncResult<ApplyOutcome> {
        self.send(transition, None).await
    }

    /// Apply a transition only if `fence` is still current when the actor
    /// gets to it.
    pub async fn dispatch_fenced(
        &self,
        transition: Transition,
        fence: GenerationFence,
    ) -> SyncResult<ApplyOutcome> {
        self.send(transition, Some(fence)).await
    }

    /// The latest published state.
    pub fn snapshot(&self) -> Arc<AppState> {
        self.snapshot.borrow().clone()
    }

    /// Watch the state; each receiver sees the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppState>> {
        self.snapshot.clone()
    }

    /// Per-transition events. Slow receivers get `Lagged`.
    pub fn events(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    async fn send(
        &self,
        transition: Transition,
        fence: Option<GenerationFence>,
    ) -> SyncResult<ApplyOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StateCommand {
                transition,
                fence,
                reply,
            })
            .map_err(|_| SyncError::StateClosed)?;
        rx.await.map_err(|_| SyncError::StateClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityResolver;
    use crate::identity::MemoryAuthProvider;
    use crate::remote::DetachedRemote;
    use chiron_store::LocalStore;
    use chiron_types::{ContactDraft, EntityId, UserId};

    #[tokio::test]
    async fn test_dispatch_publishes_snapshot_and_event() {
        let handle = spawn_state_actor(AppState::default(), 16);
        let mut events = handle.events();

        let contact = ContactDraft::new("Alex", "555").into_contact(EntityId::new("c1"));
        let outcome = handle.dispatch(Transition::AddContact(contact.clone())).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(handle.snapshot().contact_list(), vec![contact]);

        let event = events.recv().await.unwrap();
        assert_eq!(event.transition, "add_contact");
        assert_eq!(event.version, 1);
    }

    #[tokio::test]
    async fn test_stale_fence_is_discarded() {
        let resolver = IdentityResolver::new(
            Arc::new(MemoryAuthProvider::new()),
            LocalStore::in_memory(),
            Arc::new(DetachedRemote),
        );
        let handle = spawn_state_actor(AppState::default(), 16);

        let fence = resolver.fence();
        resolver.on_auth_state_changed(Some(UserId::new("u2")));

        let contact = ContactDraft::new("Alex", "555").into_contact(EntityId::new("c1"));
        let outcome = handle
            .dispatch_fenced(Transition::SetContacts(vec![contact]), fence)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Discarded);
        assert!(handle.snapshot().contacts.is_empty());
    }

    #[tokio::test]
    async fn test_transitions_apply_in_order_across_clones() {
        let handle = spawn_state_actor(AppState::default(), 64);
        let mut tasks = Vec::new();
        for i in 0..20 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let c = ContactDraft::new(format!("n{i}"), "555").into_contact(EntityId::new(format!("c{i}")));
                handle.dispatch(Transition::AddContact(c)).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(handle.snapshot().contacts.len(), 20);
    }
}
