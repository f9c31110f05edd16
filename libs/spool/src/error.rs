use std::path::Path;

use spool_api::PluginError;

/// Ошибки локального буфера. При открытии: фатальны для процесса.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("open {path}: {source}")]
    Open { path: String, source: std::io::Error },

    #[error("buffer {path} is locked by another process (pid {holder})")]
    Locked { path: String, holder: String },

    #[error("corrupt buffer log {path}, line {line}: {detail}")]
    Corrupt { path: String, line: usize, detail: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("buffer lock poisoned")]
    Poisoned,

    #[error("buffer task: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub(crate) fn open(path: &Path, source: std::io::Error) -> Self {
        StoreError::Open { path: path.display().to_string(), source }
    }
}

/// Ошибка обработки одного входящего сообщения. Сообщение не
/// подтверждается и будет доставлено повторно.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("buffer append: {0}")]
    Append(#[from] StoreError),
}

/// Ошибка выгрузки одной партиции. Записи группы остаются в буфере
/// до следующего прохода; остальные группы не затрагиваются.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("encode: {0}")]
    Encode(PluginError),

    #[error("upload {key}: {source}")]
    Upload { key: String, source: PluginError },

    #[error("delete after upload: {0}")]
    Delete(StoreError),
}

impl GroupError {
    /// Пройдёт ли повтор на следующем проходе без вмешательства оператора.
    pub fn is_transient(&self) -> bool {
        match self {
            GroupError::Encode(_) => false,
            GroupError::Upload { source, .. } => source.is_transient(),
            GroupError::Delete(_) => true,
        }
    }
}
