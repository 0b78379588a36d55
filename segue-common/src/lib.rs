//! # Segue Common Library
//!
//! Shared code for the Segue crates including:
//! - Playback data model (media products, session ids, playback context)
//! - Event types (SegueEvent enum) and the EventBus
//! - Configuration file resolution
//! - Fade curve definitions for the crossfade ramp

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod model;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
