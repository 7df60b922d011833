//! Error taxonomy for the synchronization layer

use thiserror::Error;

/// Failures surfaced by the orchestrator and the analytics client
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure talking to the analytics server
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    /// Body could not be decoded
    #[error("invalid response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// HTTP client could not be constructed (TLS backend, invalid settings)
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// User or expiry missing/invalid
    #[error("invalid session key: {0}")]
    InvalidKey(String),
}

impl SyncError {
    /// Transport-class errors freeze the dataset and are retried next tick
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. } | SyncError::Status { .. } | SyncError::Decode { .. }
        )
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            SyncError::Transport { endpoint, .. }
            | SyncError::Status { endpoint, .. }
            | SyncError::Decode { endpoint, .. } => Some(endpoint),
            SyncError::Client(_) | SyncError::InvalidKey(_) => None,
        }
    }
}
