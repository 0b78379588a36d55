//! Per-session metadata
//!
//! - `info.rs`: entitlement result and stream descriptor
//! - `store.rs`: keyed store of transitions, playback info and stream info

pub mod info;
pub mod store;

pub use info::{AssetPresentation, LoudnessInfo, PlaybackInfo, StreamInfo};
pub use store::SessionStore;
