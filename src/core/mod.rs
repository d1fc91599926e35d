// Core algorithm exports
pub mod distance;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod proximity;

pub use distance::{bounding_box, distance_meters, haversine_meters, BoundingBox};
pub use engine::{CycleOutcome, CycleReport, EngineConfig, EngineState, EngineStats, MatchingEngine};
pub use error::MatchError;
pub use ledger::{LedgerEntry, NotificationLedger};
pub use proximity::{BoundingBoxIndex, CrossProductIndex, IndexKind, ProximityIndex};
