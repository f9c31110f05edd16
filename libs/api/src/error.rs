use std::fmt;

// ════════════════════════════════════════════════════════════════
//  ErrorKind
// ════════════════════════════════════════════════════════════════

/// Category of a plugin error (queue, sink, encoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration; surfaces at startup.
    Config,
    /// External system unavailable: network, disk, timeout.
    Unavailable,
    /// Data cannot be decoded or encoded.
    InvalidData,
    /// Operation refused: bad key, stale receipt.
    Rejected,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::InvalidData => "invalid-data",
            ErrorKind::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════
//  PluginError
// ════════════════════════════════════════════════════════════════

/// Error type at the `QueueSource` / `BlobSink` / `ColumnEncoder` boundary.
///
/// The core never retries the call itself: the message stays in the queue,
/// the group stays in the buffer, and the retry happens on the next receive
/// or flush pass. `kind` drives logging and transient/permanent decisions.
#[derive(Clone)]
pub struct PluginError {
    kind: ErrorKind,
    message: String,
}

impl PluginError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidData, msg)
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, msg)
    }

    /// Prefix the message with `ctx`; the kind is kept.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self { kind: self.kind, message: format!("{ctx}: {}", self.message) }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether repeating the same call later may succeed (стоит ли ждать).
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Unavailable
    }
}

impl fmt::Debug for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PluginError {}

impl From<std::io::Error> for PluginError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match e.kind() {
            Io::InvalidData | Io::UnexpectedEof => ErrorKind::InvalidData,
            Io::NotFound | Io::PermissionDenied | Io::InvalidInput => ErrorKind::Rejected,
            _ => ErrorKind::Unavailable,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_data(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_kinds() {
        let e: PluginError = std::io::Error::other("disk gone").into();
        assert_eq!(e.kind(), ErrorKind::Unavailable);
        assert!(e.is_transient());
        assert_eq!(e.message(), "disk gone");

        let e: PluginError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(e.kind(), ErrorKind::Rejected);
        assert!(!e.is_transient());
    }

    #[test]
    fn context_keeps_kind() {
        let e = PluginError::invalid_data("bad row").with_context("group 2026/10/18/09");
        assert_eq!(e.kind(), ErrorKind::InvalidData);
        assert_eq!(e.to_string(), "group 2026/10/18/09: bad row");
        assert_eq!(format!("{e:?}"), "[invalid-data] group 2026/10/18/09: bad row");
    }
}
