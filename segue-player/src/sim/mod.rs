//! Simulated collaborators
//!
//! In-process stand-ins for the decode engine, the entitlement resolver and
//! the telemetry transport. They back the demo binary and the test suites.

mod engine;
mod resolver;
mod telemetry;

pub use engine::{SimBackend, SimulatedDecodeEngine};
pub use resolver::{SimTrack, SimulatedResolver};
pub use telemetry::RecordingTelemetry;
