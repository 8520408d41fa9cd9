//! Typed identifiers for entities and users.
//!
//! Both ID types wrap an opaque string. Entity IDs may come from two places:
//! minted locally (UUIDv7, time-ordered) so an entity is addressable before any
//! remote roundtrip, or assigned by a remote store, in which case the remote ID
//! becomes canonical. Callers must never parse meaning out of either form.
//!
//! An empty `EntityId` means "unassigned"; the sync engine mints one before
//! the first local write.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an assessment, contact, or chat message.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

/// Identifier of an authenticated user (the owner of remote rows).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_string_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap an existing identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw identifier string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First 8 characters, for human display only.
            pub fn short(&self) -> &str {
                match self.0.char_indices().nth(8) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<$T> for String {
            fn from(id: $T) -> String {
                id.0
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_string_id!(EntityId, "EntityId");
impl_string_id!(UserId, "UserId");

impl EntityId {
    /// Mint a fresh local identifier (UUIDv7, monotonic within a process).
    pub fn mint() -> Self {
        Self(uuid::Uuid::now_v7().as_simple().to_string())
    }

    /// The "no identifier yet" sentinel.
    pub fn unassigned() -> Self {
        Self(String::new())
    }

    /// True when no identifier has been assigned yet.
    pub fn is_unassigned(&self) -> bool {
        self.0.trim().is_empty()
    }
}
