//! Error types for the naming indexer pipeline.

use thiserror::Error;

/// Errors that can occur while decoding, aggregating or persisting naming events.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Label decode error for {value}: {reason}")]
    Label { value: String, reason: String },

    #[error("Unknown event kind: {0}")]
    UnknownEvent(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(u64),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },
}

impl IndexerError {
    /// Returns `true` for failures raised by the persistence layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns `true` for per-event failures that only skip the event.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Label { .. } | Self::UnknownEvent(_)
        )
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
