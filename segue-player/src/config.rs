//! Configuration for segue-player
//!
//! Two sections in one TOML file:
//! - `[player]`: engine tuning (crossfade timing, preload threshold, quality, loudness)
//! - `[logging]`: log level for the binary
//!
//! Every field has a built-in default, so an absent file or an absent
//! section is valid. File location follows
//! `segue_common::config::resolve_config_path`.

use crate::error::{PlayerError, Result};
use segue_common::config::{load_toml_or_default, resolve_config_path, CONFIG_ENV_VAR};
use segue_common::model::QualityTier;
use segue_common::FadeCurve;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Largest pre-amp boost or cut accepted, in dB
const MAX_PRE_AMP_DB: f32 = 24.0;

/// Engine tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Crossfade starts once remaining time falls inside (0, window]
    pub crossfade_window_secs: f64,

    /// Length of the volume ramp
    pub crossfade_duration_ms: u64,

    /// Tick of the per-frame ramp callback
    pub ramp_frame_interval_ms: u64,

    /// Ramp shape
    pub fade_curve: FadeCurve,

    /// Emit a preload request when this many seconds remain and no next item is set
    pub preload_request_threshold_secs: f64,

    /// Quality requested from the resolver
    pub quality_hint: QualityTier,

    /// Apply replay-gain based loudness normalization
    pub loudness_normalization: bool,

    /// Pre-amp added to the replay gain, in dB
    pub pre_amp_db: f32,

    /// Capacity of the public event bus
    pub event_bus_capacity: usize,

    /// Placeholder duration used until the real duration is known
    pub estimated_duration_secs: f64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            crossfade_window_secs: 0.2,
            crossfade_duration_ms: 25,
            ramp_frame_interval_ms: 16,
            fade_curve: FadeCurve::EqualPower,
            preload_request_threshold_secs: 10.0,
            quality_hint: QualityTier::High,
            loudness_normalization: true,
            pre_amp_db: 0.0,
            event_bus_capacity: 1000,
            estimated_duration_secs: 0.0,
        }
    }
}

impl PlayerSettings {
    pub fn crossfade_duration(&self) -> Duration {
        Duration::from_millis(self.crossfade_duration_ms)
    }

    pub fn ramp_frame_interval(&self) -> Duration {
        Duration::from_millis(self.ramp_frame_interval_ms)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.crossfade_window_secs > 0.0) {
            return Err(PlayerError::Config(format!(
                "crossfade_window_secs must be positive, got {}",
                self.crossfade_window_secs
            )));
        }
        if self.crossfade_duration_ms == 0 {
            return Err(PlayerError::Config("crossfade_duration_ms must be non-zero".into()));
        }
        if self.crossfade_duration().as_secs_f64() > self.crossfade_window_secs {
            return Err(PlayerError::Config(format!(
                "crossfade_duration_ms ({}) must fit inside crossfade_window_secs ({})",
                self.crossfade_duration_ms, self.crossfade_window_secs
            )));
        }
        if self.ramp_frame_interval_ms == 0 {
            return Err(PlayerError::Config("ramp_frame_interval_ms must be non-zero".into()));
        }
        if self.preload_request_threshold_secs < 0.0 {
            return Err(PlayerError::Config(
                "preload_request_threshold_secs must not be negative".into(),
            ));
        }
        if !(-MAX_PRE_AMP_DB..=MAX_PRE_AMP_DB).contains(&self.pre_amp_db) {
            return Err(PlayerError::Config(format!(
                "pre_amp_db must be within +/-{} dB, got {}",
                MAX_PRE_AMP_DB, self.pre_amp_db
            )));
        }
        if self.event_bus_capacity == 0 {
            return Err(PlayerError::Config("event_bus_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub player: PlayerSettings,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Resolve, load and validate the configuration
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR)?;
        let config: ConfigFile = load_toml_or_default(path.as_deref())?;
        config.player.validate()?;
        Ok(config)
    }
}
