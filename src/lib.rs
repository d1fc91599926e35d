//! Relief Match - proximity matching and notify-once dispatch for disaster relief
//!
//! Periodically pulls help requests and volunteer registrations from a data
//! store, finds every (volunteer, help request) pair within a service radius,
//! and dispatches each pair at most once through a pluggable sink.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{distance_meters, CycleOutcome, CycleReport, MatchError, MatchingEngine, NotificationLedger, ProximityIndex};
pub use crate::models::{Coordinate, HelpRequest, NotificationEvent, PairKey, ProximityMatch, Volunteer};
