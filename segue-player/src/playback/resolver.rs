//! Entitlement/manifest resolver collaborator

use crate::error::PlayerError;
use crate::session::PlaybackInfo;
use async_trait::async_trait;
use segue_common::model::{MediaProduct, QualityTier, StreamingSessionId};
use thiserror::Error;

/// Resolution failure
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ResolveError {
    /// Whether the same request may succeed later
    pub retryable: bool,
    pub message: String,
}

impl ResolveError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

impl From<ResolveError> for PlayerError {
    fn from(err: ResolveError) -> Self {
        PlayerError::Resolve {
            retryable: err.retryable,
            message: err.message,
        }
    }
}

/// Resolves a product into playback info for one session
#[async_trait]
pub trait PlaybackInfoResolver: Send + Sync {
    async fn resolve(
        &self,
        product: &MediaProduct,
        quality_hint: QualityTier,
        session_id: StreamingSessionId,
    ) -> Result<PlaybackInfo, ResolveError>;
}
