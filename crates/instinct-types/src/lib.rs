//! Instinct Types - Core types for the instinct learning pipeline
//!
//! This module defines the records that flow between the capture sink,
//! the observation store and the analysis daemon.

pub mod instinct;
pub mod observation;

pub use instinct::{Domain, InstinctHeader, MAX_CONFIDENCE, MIN_CONFIDENCE};
pub use observation::{
    truncate_with_marker, EventKind, Observation, Phase, ToolUseNotification, TRUNCATION_MARKER,
};
