//! Playback data model shared by the engine and its consumers
//!
//! These are the identities and observable facts that cross the engine
//! boundary: what is playing (`MediaProduct`), which play-through it belongs
//! to (`StreamingSessionId`) and what is actually audible (`PlaybackContext`).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of playable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Track,
    Video,
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::Track => write!(f, "track"),
            ProductType::Video => write!(f, "video"),
        }
    }
}

/// Identity of a playable item plus playback-intent attribution
///
/// `source_id`/`source_type` describe where the play came from (album,
/// playlist, mix...). They are opaque to the engine and only forwarded to
/// telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaProduct {
    pub product_id: String,
    pub product_type: ProductType,
    pub source_id: String,
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

impl MediaProduct {
    /// Track with no particular attribution
    pub fn track(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            product_type: ProductType::Track,
            source_id: String::new(),
            source_type: String::new(),
            reference_id: None,
        }
    }

    /// Video with no particular attribution
    pub fn video(product_id: impl Into<String>) -> Self {
        Self {
            product_type: ProductType::Video,
            ..Self::track(product_id)
        }
    }

    /// Attach playback-intent attribution
    pub fn with_source(mut self, source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self.source_id = source_id.into();
        self
    }

    /// True if both products identify the same playable item
    ///
    /// Attribution is ignored: playing the same track from a different
    /// playlist is still the same item.
    pub fn same_item(&self, other: &MediaProduct) -> bool {
        self.product_id == other.product_id && self.product_type == other.product_type
    }
}

/// Unique identifier of one play-through
///
/// Minted once per play-intent and never reused. Ties entitlement, stream
/// descriptor and telemetry together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamingSessionId(Uuid);

impl StreamingSessionId {
    /// Mint a fresh session id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamingSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for StreamingSessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for StreamingSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivered quality tier
///
/// Ordered from lowest to highest so tiers can be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    Low,
    High,
    Lossless,
    HiResLossless,
}

impl QualityTier {
    /// Parse from a configuration string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(QualityTier::Low),
            "high" => Some(QualityTier::High),
            "lossless" => Some(QualityTier::Lossless),
            "hi_res_lossless" | "hires_lossless" | "hires" => Some(QualityTier::HiResLossless),
            _ => None,
        }
    }

    pub fn all() -> &'static [QualityTier] {
        &[
            QualityTier::Low,
            QualityTier::High,
            QualityTier::Lossless,
            QualityTier::HiResLossless,
        ]
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityTier::Low => write!(f, "LOW"),
            QualityTier::High => write!(f, "HIGH"),
            QualityTier::Lossless => write!(f, "LOSSLESS"),
            QualityTier::HiResLossless => write!(f, "HI_RES_LOSSLESS"),
        }
    }
}

/// Observable truth for the session that is audible/visible
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackContext {
    pub actual_product_id: String,
    pub actual_product_type: ProductType,
    /// Seconds; an estimate until the decode engine reports the real value
    pub actual_duration: f64,
    pub actual_quality: QualityTier,
    pub codec: String,
    pub playback_session_id: StreamingSessionId,
    /// Last known position in seconds
    pub asset_position: f64,
}

/// Product and context recorded when a session becomes the audible one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaProductTransition {
    pub media_product: MediaProduct,
    pub playback_context: PlaybackContext,
    /// Placeholder written before the stream finished loading
    #[serde(default)]
    pub estimated: bool,
}

impl MediaProductTransition {
    pub fn session_id(&self) -> StreamingSessionId {
        self.playback_context.playback_session_id
    }
}
