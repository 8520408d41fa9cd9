//! Shared entity and identity types for Chiron.
//!
//! This crate is the data model of the offline-first layer: typed IDs,
//! assessments, contacts, chat messages, and the identity modes that decide
//! whether remote storage is reachable at all. It has **no internal chiron
//! dependencies**: a pure leaf crate that the store and sync crates build on.
//!
//! # Key Types
//!
//! |------------------|-----------------------------------------------------|
//! | Type             | Purpose                                             |
//! |------------------|-----------------------------------------------------|
//! | [`Assessment`]   | One triage result plus its guidance fields          |
//! | [`Contact`]      | Emergency contact, keyed by [`EntityId`]            |
//! | [`ChatMessage`]  | Follow-up Q&A attached to an assessment             |
//! | [`Identity`]     | Authenticated / Guest / Unknown                     |
//! | [`Entity`]       | Ties a type to its local collection + remote table  |
//! | [`Record`]       | Type-erased entity for the remote adapter boundary  |
//! |------------------|-----------------------------------------------------|

pub mod assessment;
pub mod contact;
pub mod entity;
pub mod identity;
pub mod ids;

pub use assessment::{Assessment, GeoSnapshot, Severity, TriageStatus, sort_newest_first};
pub use contact::{ChatMessage, Contact, ContactDraft};
pub use entity::{Entity, EntityKind, Placement, Record};
pub use identity::Identity;
pub use ids::{EntityId, UserId};

/// Current time as Unix milliseconds. Used by constructors throughout the crate.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
