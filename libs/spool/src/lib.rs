pub mod config;
pub mod error;
mod flush;
mod ingest;
mod partition;
mod store;
mod worker;

pub use flush::{FlushCoordinator, FlushOutcome, FlushReport, GroupReport};
pub use ingest::IngestAdapter;
pub use partition::{KeyLayout, PartitionKey, partition};
pub use store::{RecordStore, StoreStats};
pub use worker::Worker;
