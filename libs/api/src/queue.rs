use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::PluginError;

// ════════════════════════════════════════════════════════════════
//  Queue messages
// ════════════════════════════════════════════════════════════════

/// Opaque handle used to acknowledge (delete) a queue message.
///
/// Its meaning belongs to the queue implementation: receipt handle, file
/// name, sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(pub String);

impl AckToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One message received from the queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Message id, for logging.
    pub id: String,
    /// Raw body.
    pub body: Vec<u8>,
    /// Handle for `QueueSource::ack`.
    pub ack: AckToken,
}

// ════════════════════════════════════════════════════════════════
//  QueueSource
// ════════════════════════════════════════════════════════════════

/// At-least-once message source.
///
/// A message that is not acknowledged via `ack` will be delivered again.
pub trait QueueSource: Send + Sync {
    /// Receive 0..=`max_messages` messages. Long-polls for at most `wait`,
    /// then returns whatever is available.
    fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueueMessage>, PluginError>> + Send + '_>>;

    /// Acknowledge processing; the message is removed from the queue.
    fn ack<'a>(
        &'a self,
        token: &'a AckToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;
}
