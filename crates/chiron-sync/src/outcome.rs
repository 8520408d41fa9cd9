//! What happened on the remote side of an operation.
//!
//! A mutation that returns `Ok` always completed its local step. Whether the
//! remote store saw it too is reported here, never as an error.

use chiron_types::Identity;

use crate::remote::RemoteError;

/// Why a remote attempt was not made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Guest sessions are local-only.
    Guest,
    /// Identity resolved to `Unknown` (signed out).
    SignedOut,
    /// Identity has not resolved yet; remote work is deferred.
    Unresolved,
    /// The connectivity monitor reports offline.
    Offline,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Guest => "guest",
            SkipReason::SignedOut => "signed_out",
            SkipReason::Unresolved => "unresolved",
            SkipReason::Offline => "offline",
        }
    }
}

/// Result of the single remote attempt for a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    Synced,
    Skipped(SkipReason),
    /// The entity is local-only until something resyncs it.
    Failed(RemoteError),
}

/// A completed mutation: the entity as stored (canonical id) plus the remote
/// result.
#[derive(Debug, Clone)]
pub struct MutationOutcome<T> {
    pub entity: T,
    pub remote: RemoteOutcome,
}

impl<T> MutationOutcome<T> {
    pub fn is_synced(&self) -> bool {
        matches!(self.remote, RemoteOutcome::Synced)
    }

    /// The remote failure to surface to the user, if any.
    pub fn remote_error(&self) -> Option<&RemoteError> {
        match &self.remote {
            RemoteOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_entity(self) -> T {
        self.entity
    }
}

/// Where one slice of a hydration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceSource {
    Remote,
    Local,
    /// Both sources failed; the slice was cleared.
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceReport {
    pub source: SliceSource,
    pub count: usize,
    /// Set when a remote fetch was attempted and failed.
    pub remote_error: Option<RemoteError>,
}

/// Summary of one `load_user_data` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationReport {
    pub identity: Identity,
    pub assessments: SliceReport,
    pub contacts: SliceReport,
    /// False when the identity changed mid-flight and the results were dropped.
    pub applied: bool,
}

impl HydrationReport {
    pub fn fully_remote(&self) -> bool {
        self.assessments.source == SliceSource::Remote && self.contacts.source == SliceSource::Remote
    }
}
