//! Shared indicator state.

use serde::Serialize;

/// Connectivity summary shown next to the queue counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// The durable store has not been read yet
    Unknown,
    Offline,
    /// Pending operations are waiting to be replayed
    Syncing,
    Synced,
    /// At least one operation failed and needs attention
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}
