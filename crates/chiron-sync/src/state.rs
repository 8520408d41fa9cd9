//! Application state and its transitions.
//!
//! [`AppState`] is the snapshot collaborators observe. It changes only through
//! [`reduce`], a pure function of the previous state and one [`Transition`].
//! No transition performs I/O; the [`actor`](crate::actor) is the only caller.

use indexmap::IndexMap;

use chiron_types::{Assessment, Contact, EntityId, EntityKind, sort_newest_first};

/// The in-memory aggregate presented to collaborators.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppState {
    pub current_assessment: Option<Assessment>,
    /// Newest first by creation time.
    pub assessment_history: Vec<Assessment>,
    /// Keyed by id, in insertion order.
    pub contacts: IndexMap<EntityId, Contact>,
    pub is_offline: bool,
}

impl AppState {
    pub fn assessment(&self, id: &EntityId) -> Option<&Assessment> {
        self.assessment_history.iter().find(|a| &a.id == id)
    }

    pub fn contact(&self, id: &EntityId) -> Option<&Contact> {
        self.contacts.get(id)
    }

    pub fn contact_list(&self) -> Vec<Contact> {
        self.contacts.values().cloned().collect()
    }
}

/// A named state change.
#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    SetCurrent(Option<Assessment>),
    /// Insert into history (by creation time) and make it current.
    AddAssessment(Assessment),
    /// Replace the history entry with this id, and `current` if it matches.
    UpdateAssessment(Assessment),
    /// Insert, or replace in place when the id already exists.
    AddContact(Contact),
    RemoveContact(EntityId),
    SetHistory(Vec<Assessment>),
    SetContacts(Vec<Contact>),
    SetOffline(bool),
    /// Replace both slices at once. A missing slice becomes empty.
    Hydrate {
        assessment_history: Option<Vec<Assessment>>,
        contacts: Option<Vec<Contact>>,
    },
    /// The remote store assigned `to` to an entity first stored as `from`.
    /// Entries under `from` move to `to`, keeping their position.
    Rekey {
        kind: EntityKind,
        from: EntityId,
        to: EntityId,
    },
}

impl Transition {
    /// Short name for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Transition::SetCurrent(_) => "set_current",
            Transition::AddAssessment(_) => "add_assessment",
            Transition::UpdateAssessment(_) => "update_assessment",
            Transition::AddContact(_) => "add_contact",
            Transition::RemoveContact(_) => "remove_contact",
            Transition::SetHistory(_) => "set_history",
            Transition::SetContacts(_) => "set_contacts",
            Transition::SetOffline(_) => "set_offline",
            Transition::Hydrate { .. } => "hydrate",
            Transition::Rekey { .. } => "rekey",
        }
    }
}

/// Apply one transition.
pub fn reduce(mut state: AppState, transition: Transition) -> AppState {
    match transition {
        Transition::SetCurrent(current) => {
            state.current_assessment = current;
        }
        Transition::AddAssessment(assessment) => {
            state.assessment_history.retain(|a| a.id != assessment.id);
            let at = state
                .assessment_history
                .iter()
                .position(|a| a.created_at <= assessment.created_at)
                .unwrap_or(state.assessment_history.len());
            state.assessment_history.insert(at, assessment.clone());
            state.current_assessment = Some(assessment);
        }
        Transition::UpdateAssessment(assessment) => {
            if let Some(entry) = state
                .assessment_history
                .iter_mut()
                .find(|a| a.id == assessment.id)
            {
                *entry = assessment.clone();
            }
            if state
                .current_assessment
                .as_ref()
                .is_some_and(|c| c.id == assessment.id)
            {
                state.current_assessment = Some(assessment);
            }
        }
        Transition::AddContact(contact) => {
            state.contacts.insert(contact.id.clone(), contact);
        }
        Transition::RemoveContact(id) => {
            state.contacts.shift_remove(&id);
        }
        Transition::SetHistory(history) => {
            state.assessment_history = normalize_history(history);
            repoint_current(&mut state);
        }
        Transition::SetContacts(contacts) => {
            state.contacts = index_contacts(contacts);
        }
        Transition::SetOffline(offline) => {
            state.is_offline = offline;
        }
        Transition::Hydrate {
            assessment_history,
            contacts,
        } => {
            state.assessment_history = normalize_history(assessment_history.unwrap_or_default());
            state.contacts = index_contacts(contacts.unwrap_or_default());
            repoint_current(&mut state);
        }
        Transition::Rekey { kind, from, to } => rekey(&mut state, kind, &from, &to),
    }
    state
}

fn rekey(state: &mut AppState, kind: EntityKind, from: &EntityId, to: &EntityId) {
    match kind {
        EntityKind::Assessment => {
            if state.assessment(from).is_none() {
                return;
            }
            state.assessment_history.retain(|a| &a.id != to);
            for a in state.assessment_history.iter_mut().filter(|a| &a.id == from) {
                a.id = to.clone();
            }
            if let Some(current) = state.current_assessment.as_mut().filter(|c| &c.id == from) {
                current.id = to.clone();
            }
        }
        EntityKind::Contact => {
            if !state.contacts.contains_key(from) {
                return;
            }
            state.contacts.shift_remove(to);
            state.contacts = std::mem::take(&mut state.contacts)
                .into_iter()
                .map(|(id, mut contact)| {
                    if &id == from {
                        contact.id = to.clone();
                        (to.clone(), contact)
                    } else {
                        (id, contact)
                    }
                })
                .collect();
        }
        EntityKind::ChatMessage => {}
    }
}

fn normalize_history(mut history: Vec<Assessment>) -> Vec<Assessment> {
    sort_newest_first(&mut history);
    history
}

fn index_contacts(contacts: Vec<Contact>) -> IndexMap<EntityId, Contact> {
    contacts.into_iter().map(|c| (c.id.clone(), c)).collect()
}

/// After history is replaced, `current` must either match its history entry
/// or be cleared. A current assessment from another identity never survives.
fn repoint_current(state: &mut AppState) {
    let current = state.current_assessment.take();
    state.current_assessment = current.and_then(|c| state.assessment(&c.id).cloned());
}
