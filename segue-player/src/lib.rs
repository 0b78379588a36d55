//! # Segue Player Library (segue-player)
//!
//! Client-side playback session engine.
//!
//! **Purpose:** Turn "play this item" into a streaming session, keep exactly
//! one item audible through a dual-buffer coordinator, hand over gaplessly
//! to a preloaded next item with a short crossfade, and survive
//! connectivity loss.
//!
//! **Architecture:** One playback engine per decode backend, each owning two
//! decode-engine slots and a driver task; a dispatcher in front resolves
//! entitlements, picks an engine and joins duplicate requests.

pub mod config;
pub mod error;
pub mod playback;
pub mod player;
pub mod session;
pub mod sim;
pub mod telemetry;

pub use config::{ConfigFile, LoggingConfig, PlayerSettings};
pub use error::{PlayerError, Result};
pub use player::{BackendSpec, Player, PlayerBuilder, RecoveryOutcome};
