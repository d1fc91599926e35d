use crate::core::MatchError;
use crate::models::Coordinate;

/// Earth's mean radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate the Haversine distance between two coordinates in meters
#[inline]
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    haversine(a.latitude(), a.longitude(), b.latitude(), b.longitude())
}

/// Haversine distance in meters for raw degree values
///
/// # Errors
/// `InvalidCoordinate` if any component is NaN, infinite or out of range.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<f64, MatchError> {
    let a = Coordinate::new(lat1, lon1)?;
    let b = Coordinate::new(lat2, lon2)?;
    Ok(distance_meters(&a, &b))
}

#[inline]
fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    // Clamped: rounding can push `a` a hair outside [0, 1] for antipodal points
    let a = ((delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2))
    .clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Latitude/longitude extent of a spherical cap
///
/// `lon_range` is `None` when the cap reaches a pole or wraps the antimeridian,
/// in which case only the latitude band constrains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub lon_range: Option<(f64, f64)>,
}

/// Slack added to each side of the box, in radians, to absorb rounding
const BOX_EPSILON_RAD: f64 = 1e-9;

/// Calculate the bounding box of every point within `radius_m` of `center`
///
/// Uses the exact cap extent rather than a flat 111 km/degree approximation so
/// the box never excludes a point that haversine would place in range.
pub fn bounding_box(center: &Coordinate, radius_m: f64) -> BoundingBox {
    let angular = radius_m / EARTH_RADIUS_M + BOX_EPSILON_RAD;
    let lat = center.latitude().to_radians();
    let lon = center.longitude().to_radians();

    let min_lat = lat - angular;
    let max_lat = lat + angular;
    let half_pi = std::f64::consts::FRAC_PI_2;

    if min_lat <= -half_pi || max_lat >= half_pi || angular >= std::f64::consts::PI {
        return BoundingBox {
            min_lat: min_lat.max(-half_pi).to_degrees(),
            max_lat: max_lat.min(half_pi).to_degrees(),
            lon_range: None,
        };
    }

    let delta_lon = (angular.sin() / lat.cos()).clamp(-1.0, 1.0).asin() + BOX_EPSILON_RAD;
    let min_lon = lon - delta_lon;
    let max_lon = lon + delta_lon;

    let pi = std::f64::consts::PI;
    let lon_range = if min_lon < -pi || max_lon > pi {
        None
    } else {
        Some((min_lon.to_degrees(), max_lon.to_degrees()))
    };

    BoundingBox {
        min_lat: min_lat.to_degrees(),
        max_lat: max_lat.to_degrees(),
        lon_range,
    }
}

impl BoundingBox {
    /// Check if a coordinate is within the box
    #[inline]
    pub fn contains(&self, point: &Coordinate) -> bool {
        let lat = point.latitude();
        if lat < self.min_lat || lat > self.max_lat {
            return false;
        }

        match self.lon_range {
            Some((min_lon, max_lon)) => point.longitude() >= min_lon && point.longitude() <= max_lon,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_haversine_distance() {
        // Distance from London to Paris (approximately 344 km)
        let london = coord(51.5074, -0.1278);
        let paris = coord(48.8566, 2.3522);

        let distance = distance_meters(&london, &paris);
        assert!((distance - 344_000.0).abs() < 10_000.0, "Distance should be ~344km, got {}", distance);
    }

    #[test]
    fn test_one_degree_at_equator() {
        let d = distance_meters(&coord(0.0, 0.0), &coord(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_identical_points_are_zero() {
        let p = coord(35.0, -82.0);
        assert_eq!(distance_meters(&p, &p), 0.0);
    }

    #[test]
    fn test_raw_entry_point_validates() {
        assert!(haversine_meters(0.0, 0.0, 0.0, 1.0).is_ok());
        assert!(matches!(
            haversine_meters(f64::NAN, 0.0, 0.0, 1.0),
            Err(MatchError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            haversine_meters(0.0, 0.0, 0.0, 181.0),
            Err(MatchError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn test_antipodal_points() {
        let d = distance_meters(&coord(0.0, 0.0), &coord(0.0, 180.0));
        let half_circumference = std::f64::consts::PI * EARTH_RADIUS_M;
        assert!((d - half_circumference).abs() < 1.0);
    }

    #[test]
    fn test_bounding_box() {
        let center = coord(40.7128, -74.0060);
        let bbox = bounding_box(&center, 10_000.0);

        assert!(bbox.min_lat < 40.7128);
        assert!(bbox.max_lat > 40.7128);
        let (min_lon, max_lon) = bbox.lon_range.unwrap();
        assert!(min_lon < -74.0060);
        assert!(max_lon > -74.0060);

        // 20km / ~111km per degree = ~0.18 degrees
        let lat_span = bbox.max_lat - bbox.min_lat;
        assert!((lat_span - 0.18).abs() < 0.02, "Lat span should be ~0.18 degrees");
    }

    #[test]
    fn test_point_within_bbox() {
        let center = coord(40.7128, -74.0060);
        let bbox = bounding_box(&center, 10_000.0);

        assert!(bbox.contains(&center));
        assert!(bbox.contains(&coord(40.71, -74.0)));
        assert!(!bbox.contains(&coord(50.0, -80.0)));
    }

    #[test]
    fn test_bbox_near_pole_drops_longitude() {
        let bbox = bounding_box(&coord(89.9, 10.0), 50_000.0);
        assert!(bbox.lon_range.is_none());
        assert!((bbox.max_lat - 90.0).abs() < 1e-9);
        assert!(bbox.contains(&coord(89.9, -170.0)));
    }

    #[test]
    fn test_bbox_across_antimeridian_drops_longitude() {
        let bbox = bounding_box(&coord(0.0, 179.9), 50_000.0);
        assert!(bbox.lon_range.is_none());
        assert!(bbox.contains(&coord(0.0, -179.9)));
    }

    #[test]
    fn test_bbox_edge_point_at_radius_inside() {
        // A point due east exactly at the radius must be inside the box
        let center = coord(60.0, 10.0);
        let radius = 80_467.0;
        let bbox = bounding_box(&center, radius);

        let mut lon = 10.0;
        while distance_meters(&center, &coord(60.0, lon + 0.001)) <= radius {
            lon += 0.001;
        }
        assert!(bbox.contains(&coord(60.0, lon)));
    }
}
