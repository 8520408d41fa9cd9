//! The entity abstraction shared by the local and remote stores.
//!
//! Every persisted type implements [`Entity`], which ties it to one
//! [`EntityKind`]. The kind names both the local collection (one JSON document
//! per collection) and the remote table. [`Record`] is the type-erased form
//! handed across the remote adapter boundary.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::assessment::Assessment;
use crate::contact::{ChatMessage, Contact};
use crate::ids::EntityId;

/// Entity types known to the data layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Assessment,
    Contact,
    ChatMessage,
}

impl EntityKind {
    /// Name of the local collection document.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Assessment => "assessmentHistory",
            EntityKind::Contact => "emergencyContacts",
            EntityKind::ChatMessage => "chatMessages",
        }
    }

    /// Name of the remote table.
    pub fn remote_table(&self) -> &'static str {
        match self {
            EntityKind::Assessment => "assessments",
            EntityKind::Contact => "contacts",
            EntityKind::ChatMessage => "chat_messages",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Assessment => "assessment",
            EntityKind::Contact => "contact",
            EntityKind::ChatMessage => "chat_message",
        };
        f.write_str(name)
    }
}

/// Where a new entity lands in its collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Keep the collection sorted by `created_at`, newest first.
    NewestFirst,
    /// Keep the collection sorted by `created_at`, oldest first.
    OldestFirst,
    /// Append in insertion order.
    Append,
}

/// A persisted entity type.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;
    const PLACEMENT: Placement;

    fn id(&self) -> &EntityId;

    fn set_id(&mut self, id: EntityId);

    /// Creation time in Unix milliseconds, for time-ordered collections.
    fn created_at(&self) -> u64 {
        0
    }

    fn into_record(self) -> Record;

    /// Unwrap a record of this kind. Returns `None` for any other kind.
    fn from_record(record: Record) -> Option<Self>;
}

impl Entity for Assessment {
    const KIND: EntityKind = EntityKind::Assessment;
    const PLACEMENT: Placement = Placement::NewestFirst;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn into_record(self) -> Record {
        Record::Assessment(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Assessment(a) => Some(a),
            _ => None,
        }
    }
}

impl Entity for Contact {
    const KIND: EntityKind = EntityKind::Contact;
    const PLACEMENT: Placement = Placement::Append;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn into_record(self) -> Record {
        Record::Contact(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::Contact(c) => Some(c),
            _ => None,
        }
    }
}

impl Entity for ChatMessage {
    const KIND: EntityKind = EntityKind::ChatMessage;
    const PLACEMENT: Placement = Placement::OldestFirst;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn into_record(self) -> Record {
        Record::ChatMessage(self)
    }

    fn from_record(record: Record) -> Option<Self> {
        match record {
            Record::ChatMessage(m) => Some(m),
            _ => None,
        }
    }
}

/// A type-erased entity, as exchanged with a remote store.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Assessment(Assessment),
    Contact(Contact),
    ChatMessage(ChatMessage),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::Assessment(_) => EntityKind::Assessment,
            Record::Contact(_) => EntityKind::Contact,
            Record::ChatMessage(_) => EntityKind::ChatMessage,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Record::Assessment(a) => &a.id,
            Record::Contact(c) => &c.id,
            Record::ChatMessage(m) => &m.id,
        }
    }

    pub fn set_id(&mut self, id: EntityId) {
        match self {
            Record::Assessment(a) => a.id = id,
            Record::Contact(c) => c.id = id,
            Record::ChatMessage(m) => m.id = id,
        }
    }

    pub fn created_at(&self) -> u64 {
        match self {
            Record::Assessment(a) => a.created_at,
            Record::Contact(_) => 0,
            Record::ChatMessage(m) => m.created_at,
        }
    }
}
