use thiserror::Error;

/// Errors raised by the matching core
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatchError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid radius: {0} (must be a finite number of meters > 0)")]
    InvalidRadius(f64),

    #[error("Invalid poll interval: must be greater than zero")]
    InvalidInterval,

    #[error("Matching engine is already running")]
    AlreadyRunning,
}
