//! Decode engine collaborator
//!
//! A decode engine renders one stream at a time. The coordinator owns two of
//! them per backend and drives them through this trait; everything the
//! engine observes while rendering comes back as `DecodeEvent`s on its
//! broadcast channel.

use crate::session::StreamInfo;
use async_trait::async_trait;
use segue_common::model::{QualityTier, StreamingSessionId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Whether a decode fault can be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Transient (network, segment fetch); reload on next play
    Network,
    /// Stream cannot be rendered
    Fatal,
}

/// Fault reported by a decode engine
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind:?} decode fault {code}: {message}")]
pub struct DecodeFault {
    pub kind: FaultKind,
    pub code: String,
    pub message: String,
}

impl DecodeFault {
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Network,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Fatal,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FaultKind::Fatal
    }
}

/// Signal emitted by a decode engine
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeSignal {
    /// Real duration became known (seconds)
    DurationChange(f64),
    TimeUpdate,
    Playing,
    Paused,
    /// Buffer underrun while playing
    Waiting,
    Ended,
    Error(DecodeFault),
    /// Delivered quality changed (adaptive streams)
    QualityChange(QualityTier),
}

/// Signal plus the stream it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeEvent {
    /// Session of the stream that was loaded when the signal fired
    pub session_id: Option<StreamingSessionId>,
    /// Position in seconds at the time of the signal
    pub position: f64,
    pub signal: DecodeSignal,
}

/// Decode engine interface
#[async_trait]
pub trait DecodeEngine: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &str;

    fn can_play(&self, codec: &str) -> bool;

    /// Load `stream` positioned at `start_position`; resolves once ready to play
    async fn load(&self, stream: &StreamInfo, start_position: f64) -> Result<(), DecodeFault>;

    async fn play(&self) -> Result<(), DecodeFault>;

    async fn pause(&self);

    async fn seek(&self, position: f64) -> Result<(), DecodeFault>;

    /// Release the loaded stream
    async fn unload(&self);

    fn position(&self) -> f64;

    /// Duration of the loaded stream, once known
    fn duration(&self) -> Option<f64>;

    /// Slot volume (crossfade gain), 0.0..=1.0
    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;

    /// Loudness normalization gain combined with the user volume
    fn set_loudness_gain(&self, gain: f32);

    fn subscribe(&self) -> broadcast::Receiver<DecodeEvent>;
}

/// Creates decode engines for one backend
pub type DecodeEngineFactory = Arc<dyn Fn() -> Arc<dyn DecodeEngine> + Send + Sync>;
