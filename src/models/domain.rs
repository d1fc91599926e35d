use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core::MatchError;

/// Geographic position in degrees
///
/// Always holds a finite latitude in [-90, 90] and longitude in [-180, 180];
/// every constructor (including deserialization) goes through [`Coordinate::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = MatchError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.latitude, raw.longitude)
    }
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, MatchError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(MatchError::InvalidCoordinate(format!(
                "latitude {} outside [-90, 90]",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(MatchError::InvalidCoordinate(format!(
                "longitude {} outside [-180, 180]",
                longitude
            )));
        }

        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Parses the data store's `"<lat>, <lon>"` location string
impl FromStr for Coordinate {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| MatchError::InvalidCoordinate(format!("missing comma in {:?}", s)))?;

        let latitude: f64 = lat
            .trim()
            .parse()
            .map_err(|_| MatchError::InvalidCoordinate(format!("bad latitude in {:?}", s)))?;
        let longitude: f64 = lon
            .trim()
            .parse()
            .map_err(|_| MatchError::InvalidCoordinate(format!("bad longitude in {:?}", s)))?;

        Coordinate::new(latitude, longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// A victim's request for help
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelpRequest {
    pub id: String,
    pub coordinate: Coordinate,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A registered volunteer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volunteer {
    pub id: String,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(rename = "registeredAt")]
    pub registered_at: DateTime<Utc>,
}

/// Ledger key identifying a (volunteer, help request) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    #[serde(rename = "volunteerId")]
    pub volunteer_id: String,
    #[serde(rename = "helpRequestId")]
    pub help_request_id: String,
}

impl PairKey {
    pub fn new(volunteer_id: impl Into<String>, help_request_id: impl Into<String>) -> Self {
        Self {
            volunteer_id: volunteer_id.into(),
            help_request_id: help_request_id.into(),
        }
    }
}

/// A volunteer within range of a help request, produced fresh each cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityMatch {
    #[serde(rename = "volunteerId")]
    pub volunteer_id: String,
    #[serde(rename = "helpRequestId")]
    pub help_request_id: String,
    #[serde(rename = "distanceMeters")]
    pub distance_meters: f64,
}

impl ProximityMatch {
    pub fn pair(&self) -> PairKey {
        PairKey::new(self.volunteer_id.clone(), self.help_request_id.clone())
    }
}

/// Payload handed to a dispatch sink for a newly matched pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    #[serde(rename = "match")]
    pub proximity_match: ProximityMatch,
    pub category: String,
    #[serde(rename = "volunteerName")]
    pub volunteer_name: Option<String>,
    #[serde(rename = "volunteerPhone")]
    pub volunteer_phone: Option<String>,
    #[serde(rename = "emittedAt")]
    pub emitted_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(proximity_match: ProximityMatch, request: &HelpRequest, volunteer: &Volunteer) -> Self {
        Self {
            id: Uuid::new_v4(),
            proximity_match,
            category: request.category.clone(),
            volunteer_name: volunteer.name.clone(),
            volunteer_phone: volunteer.phone.clone(),
            emitted_at: Utc::now(),
        }
    }
}
