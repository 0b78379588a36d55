//! Simulated entitlement resolver
//!
//! Serves a fixed catalogue, counts fetches per product and supports latency
//! and failure injection. Locators use the `sim://{product_id}/{ms}` form the
//! simulated decode engine understands.

use crate::playback::context::lock;
use crate::playback::resolver::{PlaybackInfoResolver, ResolveError};
use crate::session::{AssetPresentation, LoudnessInfo, PlaybackInfo};
use async_trait::async_trait;
use chrono::Utc;
use segue_common::model::{MediaProduct, QualityTier, StreamingSessionId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Catalogue entry
#[derive(Debug, Clone)]
pub struct SimTrack {
    pub duration_secs: f64,
    /// Whether the manifest carries the duration up front
    pub duration_known: bool,
    /// Served quality; the hint is honoured when unset
    pub quality: Option<QualityTier>,
    pub codec: Option<String>,
    pub preview: bool,
    pub expires_in: chrono::Duration,
    pub loudness: Option<LoudnessInfo>,
}

impl SimTrack {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            duration_known: true,
            quality: None,
            codec: None,
            preview: false,
            expires_in: chrono::Duration::hours(1),
            loudness: None,
        }
    }

    pub fn preview(mut self) -> Self {
        self.preview = true;
        self
    }

    pub fn expires_in(mut self, expires_in: chrono::Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn quality(mut self, quality: QualityTier) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn loudness(mut self, replay_gain_db: f32, peak_amplitude: f32) -> Self {
        self.loudness = Some(LoudnessInfo {
            replay_gain_db,
            peak_amplitude,
        });
        self
    }

    /// Duration only becomes known once the stream is loaded
    pub fn unknown_duration(mut self) -> Self {
        self.duration_known = false;
        self
    }
}

#[derive(Default)]
pub struct SimulatedResolver {
    tracks: Mutex<HashMap<String, SimTrack>>,
    default_track: Mutex<Option<SimTrack>>,
    fetches: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, ResolveError>>,
    latency: Mutex<Duration>,
}

impl SimulatedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_track(&self, product_id: &str, duration_secs: f64) {
        self.add(product_id, SimTrack::new(duration_secs));
    }

    pub fn add(&self, product_id: &str, track: SimTrack) {
        lock(&self.tracks).insert(product_id.to_string(), track);
    }

    /// Serve unknown product ids with `track` instead of failing
    pub fn set_default_track(&self, track: SimTrack) {
        *lock(&self.default_track) = Some(track);
    }

    /// Delay every resolution by `latency` (tokio time)
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Fail every resolution of `product_id` until cleared
    pub fn fail(&self, product_id: &str, error: ResolveError) {
        lock(&self.failures).insert(product_id.to_string(), error);
    }

    pub fn clear_failure(&self, product_id: &str) {
        lock(&self.failures).remove(product_id);
    }

    /// Resolutions started for `product_id`
    pub fn fetch_count(&self, product_id: &str) -> usize {
        lock(&self.fetches).get(product_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PlaybackInfoResolver for SimulatedResolver {
    async fn resolve(
        &self,
        product: &MediaProduct,
        quality_hint: QualityTier,
        session_id: StreamingSessionId,
    ) -> Result<PlaybackInfo, ResolveError> {
        let product_id = product.product_id.as_str();
        *lock(&self.fetches).entry(product_id.to_string()).or_default() += 1;

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = lock(&self.failures).get(product_id).cloned() {
            return Err(error);
        }
        let track = lock(&self.tracks)
            .get(product_id)
            .cloned()
            .or_else(|| lock(&self.default_track).clone())
            .ok_or_else(|| ResolveError::permanent(format!("unknown product {}", product_id)))?;

        let quality = track.quality.unwrap_or(quality_hint);
        let codec = track.codec.clone().unwrap_or_else(|| match quality {
            QualityTier::Lossless | QualityTier::HiResLossless => "flac".to_string(),
            _ => "aac".to_string(),
        });
        let duration_ms = (track.duration_secs * 1000.0).round() as u64;
        debug!(%product_id, %session_id, %quality, "Simulated resolution");

        Ok(PlaybackInfo {
            streaming_session_id: session_id,
            product_id: product_id.to_string(),
            product_type: product.product_type,
            asset_presentation: if track.preview {
                AssetPresentation::Preview
            } else {
                AssetPresentation::Full
            },
            quality,
            codec,
            locator: format!("sim://{}/{}", product_id, duration_ms),
            expires_at: Utc::now() + track.expires_in,
            duration: track.duration_known.then_some(track.duration_secs),
            loudness: track.loudness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_and_fails() {
        let resolver = SimulatedResolver::new();
        resolver.add_track("1", 3.5);
        let product = MediaProduct::track("1");

        let info = resolver
            .resolve(&product, QualityTier::High, StreamingSessionId::new())
            .await
            .unwrap();
        assert_eq!(info.locator, "sim://1/3500");
        assert_eq!(info.codec, "aac");
        assert_eq!(info.duration, Some(3.5));

        resolver.fail("1", ResolveError::retryable("503"));
        let err = resolver
            .resolve(&product, QualityTier::High, StreamingSessionId::new())
            .await
            .unwrap_err();
        assert!(err.retryable);
        assert_eq!(resolver.fetch_count("1"), 2);

        let err = resolver
            .resolve(&MediaProduct::track("404"), QualityTier::High, StreamingSessionId::new())
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
