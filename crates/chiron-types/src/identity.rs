//! Identity modes.
//!
//! Exactly one mode is active at a time. `Unknown` covers both "still
//! resolving at startup" and "signed out, waiting for the user to pick".

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Which identity governs remote access for the current session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Identity {
    /// Signed in; remote rows are owned by `user_id`.
    Authenticated { user_id: UserId },
    /// Explicitly continuing without an account. Local-only.
    Guest,
    /// Not yet resolved, or signed out.
    #[default]
    Unknown,
}

impl Identity {
    pub fn authenticated(user_id: impl Into<UserId>) -> Self {
        Identity::Authenticated {
            user_id: user_id.into(),
        }
    }

    /// The remote owner, if any. Only authenticated sessions own remote rows.
    pub fn owner(&self) -> Option<&UserId> {
        match self {
            Identity::Authenticated { user_id } => Some(user_id),
            Identity::Guest | Identity::Unknown => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Identity::Authenticated { .. })
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest)
    }

    /// Short label for logs: `authenticated`, `guest`, `unknown`.
    pub fn mode_name(&self) -> &'static str {
        match self {
            Identity::Authenticated { .. } => "authenticated",
            Identity::Guest => "guest",
            Identity::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Authenticated { user_id } => write!(f, "authenticated({user_id})"),
            other => f.write_str(other.mode_name()),
        }
    }
}
