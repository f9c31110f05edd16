use std::future::Future;
use std::pin::Pin;

use crate::{Heartbeat, PluginError};

// ════════════════════════════════════════════════════════════════
//  BlobSink
// ════════════════════════════════════════════════════════════════

/// Object store (bucket/container) that receives the encoded files.
///
/// `put` to an existing key overwrites it and succeeds, so re-uploading a
/// group after a crash is idempotent. Timeouts and retries belong to the
/// implementation. `Ok` means the object is durable.
pub trait BlobSink: Send + Sync {
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;
}

// ════════════════════════════════════════════════════════════════
//  ColumnEncoder
// ════════════════════════════════════════════════════════════════

/// Serializes one group of heartbeats into a self-describing columnar
/// block (`device_id`, `heartbeat_time`).
pub trait ColumnEncoder: Send + Sync {
    /// Encode a group, preserving row order. An empty group is an
    /// `InvalidData` error.
    fn encode(&self, rows: &[Heartbeat]) -> Result<Vec<u8>, PluginError>;

    /// File extension without the dot, e.g. `"parquet"`.
    fn extension(&self) -> &str;
}
