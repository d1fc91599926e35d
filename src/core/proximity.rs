use crate::core::{
    distance::{bounding_box, distance_meters},
    MatchError,
};
use crate::models::{HelpRequest, ProximityMatch, Volunteer};

/// Computes every (volunteer, help request) pair within a radius
///
/// Implementations must agree exactly: a pair is included iff its haversine
/// distance is `<= radius_meters`, and results are ordered by
/// `(help_request_id, volunteer_id)`.
pub trait ProximityIndex: Send + Sync + std::fmt::Debug {
    fn find_matches(
        &self,
        help_requests: &[HelpRequest],
        volunteers: &[Volunteer],
        radius_meters: f64,
    ) -> Result<Vec<ProximityMatch>, MatchError>;
}

/// Reject radii that are not a finite positive number of meters
pub fn validate_radius(radius_meters: f64) -> Result<(), MatchError> {
    if radius_meters.is_finite() && radius_meters > 0.0 {
        Ok(())
    } else {
        Err(MatchError::InvalidRadius(radius_meters))
    }
}

fn sort_matches(matches: &mut [ProximityMatch]) {
    matches.sort_by(|a, b| {
        a.help_request_id
            .cmp(&b.help_request_id)
            .then_with(|| a.volunteer_id.cmp(&b.volunteer_id))
    });
}

/// Naive O(V·H) cross product
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossProductIndex;

impl ProximityIndex for CrossProductIndex {
    fn find_matches(
        &self,
        help_requests: &[HelpRequest],
        volunteers: &[Volunteer],
        radius_meters: f64,
    ) -> Result<Vec<ProximityMatch>, MatchError> {
        validate_radius(radius_meters)?;

        let mut matches: Vec<ProximityMatch> = help_requests
            .iter()
            .flat_map(|request| {
                volunteers.iter().filter_map(move |volunteer| {
                    let distance = distance_meters(&volunteer.coordinate, &request.coordinate);
                    (distance <= radius_meters).then(|| ProximityMatch {
                        volunteer_id: volunteer.id.clone(),
                        help_request_id: request.id.clone(),
                        distance_meters: distance,
                    })
                })
            })
            .collect();

        sort_matches(&mut matches);
        Ok(matches)
    }
}

/// Cross product with a spherical-cap bounding box pre-filter
///
/// Each help request's box is computed once; volunteers outside it skip the
/// trigonometry entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBoxIndex;

impl ProximityIndex for BoundingBoxIndex {
    fn find_matches(
        &self,
        help_requests: &[HelpRequest],
        volunteers: &[Volunteer],
        radius_meters: f64,
    ) -> Result<Vec<ProximityMatch>, MatchError> {
        validate_radius(radius_meters)?;

        let mut matches = Vec::new();
        for request in help_requests {
            let bbox = bounding_box(&request.coordinate, radius_meters);

            for volunteer in volunteers {
                if !bbox.contains(&volunteer.coordinate) {
                    continue;
                }

                let distance = distance_meters(&volunteer.coordinate, &request.coordinate);
                if distance <= radius_meters {
                    matches.push(ProximityMatch {
                        volunteer_id: volunteer.id.clone(),
                        help_request_id: request.id.clone(),
                        distance_meters: distance,
                    });
                }
            }
        }

        sort_matches(&mut matches);
        Ok(matches)
    }
}

/// Index implementation selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    CrossProduct,
    BoundingBox,
}

impl IndexKind {
    pub fn build(self) -> Box<dyn ProximityIndex> {
        match self {
            IndexKind::CrossProduct => Box::new(CrossProductIndex),
            IndexKind::BoundingBox => Box::new(BoundingBoxIndex),
        }
    }
}
