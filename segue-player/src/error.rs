//! Error types for segue-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Errors are `Clone` so a single in-flight result can be shared by every
//! caller waiting on it.

use segue_common::model::{ProductType, QualityTier, StreamingSessionId};
use thiserror::Error;

/// Record kinds held by the session store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRecord {
    Transition,
    PlaybackInfo,
    StreamInfo,
}

impl std::fmt::Display for StoreRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreRecord::Transition => write!(f, "media product transition"),
            StoreRecord::PlaybackInfo => write!(f, "playback info"),
            StoreRecord::StreamInfo => write!(f, "stream info"),
        }
    }
}

/// Session store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A clone source must be fully resolved
    #[error("Cannot clone session {session_id}: missing {record}")]
    MissingRecord {
        session_id: StreamingSessionId,
        record: StoreRecord,
    },

    /// Target id already has records
    #[error("Session {0} already exists")]
    AlreadyExists(StreamingSessionId),
}

/// Main error type for segue-player
#[derive(Error, Debug, Clone)]
pub enum PlayerError {
    /// Entitlement/manifest resolution failed
    #[error("Resolve error: {message}")]
    Resolve { retryable: bool, message: String },

    /// Decode engine rejected an operation
    #[error("Decode error: {0}")]
    Decode(String),

    /// No capability table entry can play the stream
    #[error("No decode engine supports {product_type} at {quality} ({codec})")]
    NoCompatibleEngine {
        product_type: ProductType,
        quality: QualityTier,
        codec: String,
    },

    /// Operation needs a loaded session
    #[error("No active session")]
    NoActiveSession,

    /// A newer load or reset replaced this operation
    #[error("Operation superseded by a newer request")]
    Superseded,

    /// Cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Session store errors
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<segue_common::Error> for PlayerError {
    fn from(err: segue_common::Error) -> Self {
        PlayerError::Config(err.to_string())
    }
}

/// Convenience Result type using segue-player PlayerError
pub type Result<T> = std::result::Result<T, PlayerError>;
