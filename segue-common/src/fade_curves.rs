//! Volume curves for the slot handoff ramp
//!
//! A crossfade moves the outgoing slot from volume 1 to 0 and the incoming
//! slot from 0 to 1 over normalized progress `p ∈ [0, 1]`. The curve decides
//! the shape of both gains.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Fade curve types for crossfading
///
/// - EqualPower: constant perceived loudness (out = cos(pπ/2), in = sin(pπ/2))
/// - Linear: constant rate of change, dips ~3 dB at the midpoint
/// - SCurve: smooth acceleration and deceleration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    EqualPower,
    Linear,
    SCurve,
}

/// Gains for both slots at one point of the ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampGains {
    pub outgoing: f32,
    pub incoming: f32,
}

impl FadeCurve {
    /// Fade-in multiplier at normalized position (0.0 silent → 1.0 full)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
            FadeCurve::Linear => t,
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
        }
    }

    /// Fade-out multiplier at normalized position (1.0 full → 0.0 silent)
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
        }
    }

    /// Both slot gains at normalized ramp progress
    pub fn gains(&self, progress: f32) -> RampGains {
        RampGains {
            outgoing: self.calculate_fade_out(progress),
            incoming: self.calculate_fade_in(progress),
        }
    }

    /// Parse curve from a configuration string
    ///
    /// Accepts 'equal_power'/'equalpower', 'linear', 'cosine'/'s_curve'/'scurve'.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "equal_power" | "equalpower" => Some(FadeCurve::EqualPower),
            "linear" => Some(FadeCurve::Linear),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Some(FadeCurve::SCurve),
            _ => None,
        }
    }

    pub fn all_variants() -> &'static [FadeCurve] {
        &[FadeCurve::EqualPower, FadeCurve::Linear, FadeCurve::SCurve]
    }
}

impl Default for FadeCurve {
    /// Equal power keeps perceived loudness constant across the handoff
    fn default() -> Self {
        FadeCurve::EqualPower
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FadeCurve::EqualPower => write!(f, "Equal Power"),
            FadeCurve::Linear => write!(f, "Linear"),
            FadeCurve::SCurve => write!(f, "S-Curve"),
        }
    }
}
