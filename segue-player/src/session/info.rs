//! Entitlement result and the playable stream descriptor derived from it

use chrono::{DateTime, Utc};
use segue_common::model::{ProductType, QualityTier, StreamingSessionId};
use serde::{Deserialize, Serialize};

/// Whether the entitlement covers the full asset or a preview clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetPresentation {
    Full,
    Preview,
}

/// Replay-gain metadata delivered with the manifest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessInfo {
    pub replay_gain_db: f32,
    /// Linear sample peak (1.0 = full scale)
    pub peak_amplitude: f32,
}

impl LoudnessInfo {
    /// Linear gain for this stream, never pushing the peak above full scale
    pub fn linear_gain(&self, pre_amp_db: f32) -> f32 {
        let gain = 10f32.powf((self.replay_gain_db + pre_amp_db) / 20.0);
        if self.peak_amplitude > 0.0 {
            gain.min(1.0 / self.peak_amplitude)
        } else {
            gain
        }
    }
}

/// Entitlement/manifest result for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackInfo {
    pub streaming_session_id: StreamingSessionId,
    pub product_id: String,
    pub product_type: ProductType,
    pub asset_presentation: AssetPresentation,
    pub quality: QualityTier,
    pub codec: String,
    pub locator: String,
    pub expires_at: DateTime<Utc>,
    /// Pre-known duration in seconds, when the manifest carries one
    pub duration: Option<f64>,
    pub loudness: Option<LoudnessInfo>,
}

impl PlaybackInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn with_session_id(&self, session_id: StreamingSessionId) -> Self {
        Self {
            streaming_session_id: session_id,
            ..self.clone()
        }
    }
}

/// Playable stream descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub streaming_session_id: StreamingSessionId,
    pub product_type: ProductType,
    pub locator: String,
    pub codec: String,
    pub quality: QualityTier,
    pub expires_at: DateTime<Utc>,
    pub duration: Option<f64>,
    pub preview: bool,
}

impl StreamInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn with_session_id(&self, session_id: StreamingSessionId) -> Self {
        Self {
            streaming_session_id: session_id,
            ..self.clone()
        }
    }
}

impl From<&PlaybackInfo> for StreamInfo {
    fn from(info: &PlaybackInfo) -> Self {
        Self {
            streaming_session_id: info.streaming_session_id,
            product_type: info.product_type,
            locator: info.locator.clone(),
            codec: info.codec.clone(),
            quality: info.quality,
            expires_at: info.expires_at,
            duration: info.duration,
            preview: info.asset_presentation == AssetPresentation::Preview,
        }
    }
}
