use spool::error::StoreError;
use spool_api::PluginError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("buffer: {0}")]
    Store(#[from] StoreError),

    #[error("plugin: {0}")]
    Plugin(#[from] PluginError),

    #[error("{0} partition(s) left in buffer")]
    FlushIncomplete(usize),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
