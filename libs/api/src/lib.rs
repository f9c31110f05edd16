mod error;
mod queue;
mod record;
mod sink;
mod util;

pub use error::{ErrorKind, PluginError};
pub use queue::{AckToken, QueueMessage, QueueSource};
pub use record::{Heartbeat, NewHeartbeat, RecordId};
pub use sink::{BlobSink, ColumnEncoder};
pub use util::parse_utc;
