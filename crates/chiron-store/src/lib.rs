//! # chiron-store
//!
//! The on-device half of Chiron's dual persistence. Local writes always happen
//! first and must not depend on the network, so everything here is synchronous
//! and every failure is a recoverable [`LocalStoreError`].
//!
//! Layout (logical, backend-agnostic):
//! - `assessmentHistory`: JSON array of assessments, newest first
//! - `emergencyContacts`: JSON array of contacts, insertion order
//! - `chatMessages`: JSON array of chat messages, oldest first
//! - `guestMode`: `"true"` or absent
//!
//! Collections cached for a signed-in user are keyed `<collection>:<user id>`
//! (see [`LocalStore::for_owner`]).

pub mod backend;
pub mod error;
pub mod store;

pub use backend::{LocalBackend, MemoryBackend, SqliteBackend};
pub use error::{LocalResult, LocalStoreError};
pub use store::{GUEST_MODE_KEY, LocalStore};
