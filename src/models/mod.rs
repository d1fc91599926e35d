// Model exports
pub mod domain;
pub mod records;
pub mod responses;

pub use domain::{Coordinate, HelpRequest, NotificationEvent, PairKey, ProximityMatch, Volunteer};
pub use records::{HelpRequestRecord, VolunteerRecord};
pub use responses::{EngineStatusResponse, HealthResponse, LedgerChangeResponse, LedgerResponse};
