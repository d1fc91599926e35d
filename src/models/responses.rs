use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::engine::{EngineState, EngineStats};
use crate::core::ledger::LedgerEntry;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub engine: EngineState,
    pub timestamp: DateTime<Utc>,
}

/// Engine status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatusResponse {
    pub state: EngineState,
    pub radius_meters: Option<f64>,
    pub poll_interval_secs: Option<u64>,
    pub stats: EngineStats,
}

/// Ledger inspection response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerResponse {
    pub total: usize,
    pub entries: Vec<LedgerEntry>,
}

/// Result of a reset or forget call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerChangeResponse {
    pub removed: usize,
    pub remaining: usize,
}
