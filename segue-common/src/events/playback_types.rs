//! Playback-related type definitions
//!
//! Supporting types for playback state and session lifecycle.

use serde::{Deserialize, Serialize};

/// Playback state of one engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackState {
    /// Nothing loaded or the session was finished
    Idle,
    /// Loaded but paused
    NotPlaying,
    /// Audibly playing
    Playing,
    /// Waiting for data while it should be playing
    Stalled,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "IDLE"),
            PlaybackState::NotPlaying => write!(f, "NOT_PLAYING"),
            PlaybackState::Playing => write!(f, "PLAYING"),
            PlaybackState::Stalled => write!(f, "STALLED"),
        }
    }
}

/// Why a streaming session ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    /// Played to the end (or handed off by a crossfade)
    Completed,
    /// Replaced by an explicit load or reset
    Skip,
    /// Fatal decode error
    Error,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Completed => write!(f, "COMPLETE"),
            EndReason::Skip => write!(f, "SKIP"),
            EndReason::Error => write!(f, "ERROR"),
        }
    }
}

/// Category of a surfaced playback error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Entitlement/manifest resolution failed
    Resolve,
    /// Decode engine reported a fatal error
    Decode,
    /// No decode engine can play the resolved stream
    Unsupported,
}
