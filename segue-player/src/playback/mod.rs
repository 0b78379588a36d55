//! Playback sessions, slots and dispatch
//!
//! - `context`: state shared by every engine of one player
//! - `state_machine`: pure per-engine session state
//! - `coordinator` / `crossfade`: dual decode slots and the volume ramp
//! - `engine`: driver that turns decode signals into session lifecycle
//! - `selector` / `dispatcher`: engine choice, load and set-next
//! - `recovery`: connectivity loss handling
//! - `decode` / `resolver`: collaborator traits

pub mod context;
pub mod coordinator;
pub mod crossfade;
pub mod decode;
pub mod dispatcher;
pub mod engine;
pub mod recovery;
pub mod resolver;
pub mod selector;
pub mod state_machine;

pub use context::{EngineId, PlayerContext};
pub use decode::{DecodeEngine, DecodeEngineFactory, DecodeEvent, DecodeFault, DecodeSignal, FaultKind};
pub use dispatcher::LoadNextDispatcher;
pub use engine::PlaybackEngine;
pub use resolver::{PlaybackInfoResolver, ResolveError};
