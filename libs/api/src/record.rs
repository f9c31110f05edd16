use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  RecordId
// ════════════════════════════════════════════════════════════════

/// Identifier of a record in the local buffer.
///
/// Assigned by the store, strictly increasing and never reused. Used only
/// for targeted deletion: partitioning is driven by `client_time`, not id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Lower bound; real ids start at 1.
    pub const MIN: RecordId = RecordId(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ════════════════════════════════════════════════════════════════
//  Heartbeat
// ════════════════════════════════════════════════════════════════

/// A decoded heartbeat not yet stored (ещё без id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewHeartbeat {
    /// Device (endpoint) that sent the heartbeat.
    pub device_id: i64,
    /// Client-side time in UTC, not the time the server received it.
    pub client_time: DateTime<Utc>,
}

/// A buffered heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub id: RecordId,
    pub device_id: i64,
    pub client_time: DateTime<Utc>,
}
