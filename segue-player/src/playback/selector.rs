//! Capability-based engine selection

use crate::error::{PlayerError, Result};
use crate::playback::engine::PlaybackEngine;
use crate::session::StreamInfo;
use segue_common::model::{ProductType, QualityTier};
use std::sync::Arc;
use tracing::debug;

/// One row of the capability table
#[derive(Clone)]
pub struct CapabilityEntry {
    pub item_types: Vec<ProductType>,
    pub qualities: Vec<QualityTier>,
    pub engine: Arc<PlaybackEngine>,
}

impl CapabilityEntry {
    fn accepts(&self, product_type: ProductType, stream: &StreamInfo) -> bool {
        self.item_types.contains(&product_type)
            && self.qualities.contains(&stream.quality)
            && self.engine.can_play(&stream.codec)
    }
}

/// Ordered capability table; the first matching entry wins
#[derive(Clone, Default)]
pub struct EngineSelector {
    entries: Vec<CapabilityEntry>,
}

impl EngineSelector {
    pub fn new(entries: Vec<CapabilityEntry>) -> Self {
        Self { entries }
    }

    pub fn engines(&self) -> impl Iterator<Item = &Arc<PlaybackEngine>> {
        self.entries.iter().map(|entry| &entry.engine)
    }

    pub fn select(&self, product_type: ProductType, stream: &StreamInfo) -> Result<Arc<PlaybackEngine>> {
        for entry in &self.entries {
            if entry.accepts(product_type, stream) {
                return Ok(entry.engine.clone());
            }
            debug!(
                backend = entry.engine.backend(),
                codec = %stream.codec,
                quality = %stream.quality,
                "Engine cannot play stream, trying next"
            );
        }
        Err(PlayerError::NoCompatibleEngine {
            product_type,
            quality: stream.quality,
            codec: stream.codec.clone(),
        })
    }
}
