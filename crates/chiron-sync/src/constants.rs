//! Sync layer defaults.
//!
//! Centralizes hardcoded values; every one of them can be overridden through
//! [`SyncConfig`](crate::SyncConfig).

use std::time::Duration;

/// How long `load_user_data` waits for the first identity resolution.
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Broadcast buffer for state-change events. Slow subscribers see `Lagged`.
pub const DEFAULT_STATE_EVENT_CAPACITY: usize = 256;

/// Backoff before the first retry when a retry policy is enabled.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// Upper bound on retry backoff.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Application directory name under the platform config/data dirs.
pub const APP_DIR: &str = "chiron";
