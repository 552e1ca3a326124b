/// Errors that can occur during event log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// An error from the underlying storage backend.
    #[error("storage error: {0}")]
    Storage(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for LogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<csv::Error> for LogError {
    fn from(e: csv::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
