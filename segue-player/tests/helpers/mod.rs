//! Test helper modules for segue-player integration tests
//!
//! Provides reusable test infrastructure components:
//! - Harness: player wired to simulated collaborators
//! - Waiters: bounded waits on events and playback state

#![allow(dead_code)]

pub mod harness;
pub mod waiters;

pub use harness::{harness, harness_with, Harness};
pub use waiters::{ended_event, transition_to, wait_crossfade, wait_event, wait_state, WAIT};
