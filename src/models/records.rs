use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::core::MatchError;
use crate::models::domain::{Coordinate, HelpRequest, Volunteer};

/// Help request document as stored by the data store
///
/// Everything except the id is read leniently so a document with a broken
/// field still reaches the engine under its id.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HelpRequestRecord {
    #[validate(length(min = 1))]
    #[serde(alias = "$id")]
    pub id: String,
    /// `"<lat>, <lon>"`
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(default = "default_category", deserialize_with = "lenient_category")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(rename = "createdAt", alias = "$createdAt", default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_category() -> String {
    "general".to_string()
}

/// Volunteer registration document as stored by the data store
///
/// Contact fields are carried through untouched; their format never decides
/// whether a volunteer is matched.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VolunteerRecord {
    #[validate(length(min = 1))]
    #[serde(alias = "$id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: Option<String>,
    #[serde(rename = "registeredAt", alias = "$createdAt", default, deserialize_with = "lenient_timestamp")]
    pub registered_at: Option<DateTime<Utc>>,
}

/// Strings pass through, numbers are stringified, anything else is `None`
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_category<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(default_category))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc)))
}

fn invalid(err: validator::ValidationErrors) -> MatchError {
    MatchError::InvalidRecord(err.to_string())
}

fn parse_location(location: Option<&str>) -> Result<Coordinate, MatchError> {
    location
        .ok_or_else(|| MatchError::InvalidCoordinate("missing location".to_string()))?
        .parse()
}

impl HelpRequestRecord {
    /// Convert into a [`HelpRequest`], stamping `fetched_at` when the store
    /// omitted a creation time
    pub fn into_help_request(self, fetched_at: DateTime<Utc>) -> Result<HelpRequest, MatchError> {
        self.validate().map_err(invalid)?;
        let coordinate = parse_location(self.location.as_deref())?;

        Ok(HelpRequest {
            id: self.id,
            coordinate,
            category: self.category,
            description: self.description,
            created_at: self.created_at.unwrap_or(fetched_at),
        })
    }
}

impl VolunteerRecord {
    pub fn into_volunteer(self, fetched_at: DateTime<Utc>) -> Result<Volunteer, MatchError> {
        self.validate().map_err(invalid)?;
        let coordinate = parse_location(self.location.as_deref())?;

        Ok(Volunteer {
            id: self.id,
            coordinate,
            name: self.name,
            phone: self.phone,
            registered_at: self.registered_at.unwrap_or(fetched_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_request_record_from_store_json() {
        let json = r#"{
            "$id": "req-1",
            "location": "35.0, -82.0",
            "category": "medical",
            "$createdAt": "2024-09-27T12:00:00Z"
        }"#;

        let record: HelpRequestRecord = serde_json::from_str(json).unwrap();
        let request = record.into_help_request(Utc::now()).unwrap();

        assert_eq!(request.id, "req-1");
        assert_eq!(request.category, "medical");
        assert_eq!(request.coordinate.latitude(), 35.0);
        assert_eq!(request.created_at.to_rfc3339(), "2024-09-27T12:00:00+00:00");
    }

    #[test]
    fn test_missing_timestamp_uses_fetch_time() {
        let record = VolunteerRecord {
            id: "vol-1".to_string(),
            location: Some("1.0, 2.0".to_string()),
            name: Some("Dana".to_string()),
            phone: None,
            registered_at: None,
        };
        let now = Utc::now();

        let volunteer = record.into_volunteer(now).unwrap();
        assert_eq!(volunteer.registered_at, now);
        assert_eq!(volunteer.name.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_malformed_location_rejected() {
        let record = HelpRequestRecord {
            id: "req-2".to_string(),
            location: Some("thirty five, west".to_string()),
            category: "food".to_string(),
            description: None,
            created_at: None,
        };

        assert!(matches!(
            record.into_help_request(Utc::now()),
            Err(MatchError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn test_empty_id_rejected() {
        let record = HelpRequestRecord {
            id: String::new(),
            location: Some("0.0, 0.0".to_string()),
            category: "food".to_string(),
            description: None,
            created_at: None,
        };
        assert!(matches!(record.into_help_request(Utc::now()), Err(MatchError::InvalidRecord(_))));
    }

    #[test]
    fn test_phone_format_does_not_affect_conversion() {
        for phone in ["+18645550100", "864-555-0100", "12345"] {
            let volunteer = VolunteerRecord {
                id: "vol-2".to_string(),
                location: Some("0.0, 0.0".to_string()),
                name: None,
                phone: Some(phone.to_string()),
                registered_at: None,
            };
            let converted = volunteer.into_volunteer(Utc::now()).unwrap();
            assert_eq!(converted.phone.as_deref(), Some(phone));
        }
    }

    #[test]
    fn test_broken_fields_still_deserialize_with_id() {
        let json = r#"{
            "$id": "req-3",
            "location": null,
            "category": null,
            "description": 42,
            "$createdAt": "yesterday"
        }"#;

        let record: HelpRequestRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "req-3");
        assert_eq!(record.location, None);
        assert_eq!(record.category, "general");
        assert_eq!(record.description.as_deref(), Some("42"));
        assert_eq!(record.created_at, None);

        assert!(matches!(
            record.into_help_request(Utc::now()),
            Err(MatchError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn test_volunteer_without_location_deserializes() {
        let record: VolunteerRecord = serde_json::from_str(r#"{"id": "vol-3", "phone": 8645550100}"#).unwrap();
        assert_eq!(record.location, None);
        assert_eq!(record.phone.as_deref(), Some("8645550100"));
    }
}
