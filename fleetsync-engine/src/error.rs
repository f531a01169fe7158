//! Error types for the reconciliation engine.

use fleetsync_types::{AreaId, DeviceAddr, Modality};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to terminals or running a round.
///
/// Only [`SyncError::Config`] and [`SyncError::RoundInProgress`] ever escape
/// a round; everything else is folded into the round's `SyncResult`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Could not open a channel to the terminal.
    #[error("connection to {device} failed: {reason}")]
    Connection { device: DeviceAddr, reason: String },

    /// A device-facing call exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The terminal already timed out this round; no further calls are made.
    #[error("device {0} is unreachable for this round")]
    Unreachable(DeviceAddr),

    /// The terminal does not implement the command for this modality.
    #[error("{0} not supported by device")]
    Unsupported(Modality),

    /// The terminal answered with something the channel could not decode.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The terminal understood the command and refused it.
    #[error("device rejected command: {0}")]
    Rejected(String),

    /// The round was configured incorrectly. Raised before any device I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// Another round for the same area has not finished yet.
    #[error("a sync round for {0} is already in progress")]
    RoundInProgress(AreaId),

    /// The round was cancelled by its caller.
    #[error("round cancelled")]
    Cancelled,

    /// Invalid data model value.
    #[error(transparent)]
    Types(#[from] fleetsync_types::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether retrying the same call could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connection { .. } | SyncError::Timeout | SyncError::Protocol(_)
        )
    }
}
