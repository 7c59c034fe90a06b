//! Geographic utilities: great-circle distance, bearing and interpolation.
//!
//! All functions operate on [`GpsPoint`] and use a spherical Earth of radius
//! [`EARTH_RADIUS_METERS`].

use crate::constants::EARTH_RADIUS_METERS;
use crate::GpsPoint;

/// Great-circle distance between two points in meters (haversine formula).
///
/// # Example
/// ```
/// use route_narrator::geo_utils::haversine_distance;
/// use route_narrator::GpsPoint;
///
/// let a = GpsPoint::new(0.0, 0.0);
/// let b = GpsPoint::new(0.0, 1.0);
/// let d = haversine_distance(&a, &b);
/// assert!((d - 111_195.0).abs() < 1.0);
/// ```
pub fn haversine_distance(a: &GpsPoint, b: &GpsPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Initial bearing (forward azimuth) from `a` to `b` in degrees, in [0, 360).
///
/// Identical points yield 0.
pub fn initial_bearing(a: &GpsPoint, b: &GpsPoint) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();

    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if bearing >= 360.0 {
        0.0
    } else {
        bearing
    }
}

/// Linear interpolation in lat/lon space at parameter `t` (0 = `a`, 1 = `b`).
///
/// This is not great-circle interpolation; for the short and medium routes
/// this crate handles the difference is negligible.
pub fn interpolate(a: &GpsPoint, b: &GpsPoint, t: f64) -> GpsPoint {
    GpsPoint::new(
        a.latitude + (b.latitude - a.latitude) * t,
        a.longitude + (b.longitude - a.longitude) * t,
    )
}

/// Eight-point compass name for a bearing in degrees.
pub fn compass_direction(bearing: f64) -> &'static str {
    const NAMES: [&str; 8] = [
        "north",
        "northeast",
        "east",
        "southeast",
        "south",
        "southwest",
        "west",
        "northwest",
    ];
    let idx = ((bearing.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
    NAMES[idx]
}

/// Convert a distance in meters to (latitude, longitude) degree spans at `ref_lat`.
///
/// The longitude span grows toward the poles; it is capped at 360 degrees.
pub fn meters_to_degrees(meters: f64, ref_lat: f64) -> (f64, f64) {
    let meters_per_degree = EARTH_RADIUS_METERS.to_radians();
    let dlat = meters / meters_per_degree;
    let cos_lat = ref_lat.to_radians().cos().abs().max(1e-6);
    let dlng = (meters / (meters_per_degree * cos_lat)).min(360.0);
    (dlat, dlng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_equator_degree() {
        let d = haversine_distance(&GpsPoint::new(0.0, 0.0), &GpsPoint::new(0.0, 1.0));
        // 2 * pi * 6371000 / 360
        assert!((d - 111_194.93).abs() < 0.1);
    }

    #[test]
    fn test_haversine_symmetric_and_zero() {
        let london = GpsPoint::new(51.5074, -0.1278);
        let paris = GpsPoint::new(48.8566, 2.3522);
        let d1 = haversine_distance(&london, &paris);
        let d2 = haversine_distance(&paris, &london);
        assert!((d1 - d2).abs() < 1e-6);
        assert!((d1 - 343_500.0).abs() < 1_000.0);
        assert_eq!(haversine_distance(&london, &london), 0.0);
    }

    #[test]
    fn test_bearing_cardinals() {
        let origin = GpsPoint::new(0.0, 0.0);
        assert!((initial_bearing(&origin, &GpsPoint::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((initial_bearing(&origin, &GpsPoint::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((initial_bearing(&origin, &GpsPoint::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((initial_bearing(&origin, &GpsPoint::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_degenerate() {
        let p = GpsPoint::new(45.0, 7.0);
        assert_eq!(initial_bearing(&p, &p), 0.0);
    }

    #[test]
    fn test_bearing_range() {
        let points = [
            GpsPoint::new(51.5, -0.12),
            GpsPoint::new(-33.9, 151.2),
            GpsPoint::new(64.1, -21.9),
            GpsPoint::new(-54.8, -68.3),
        ];
        for a in &points {
            for b in &points {
                let bearing = initial_bearing(a, b);
                assert!((0.0..360.0).contains(&bearing));
            }
        }
    }

    #[test]
    fn test_interpolate() {
        let a = GpsPoint::new(10.0, 20.0);
        let b = GpsPoint::new(20.0, 40.0);
        assert_eq!(interpolate(&a, &b, 0.0), a);
        assert_eq!(interpolate(&a, &b, 1.0), b);
        assert_eq!(interpolate(&a, &b, 0.5), GpsPoint::new(15.0, 30.0));
    }

    #[test]
    fn test_compass_direction() {
        assert_eq!(compass_direction(0.0), "north");
        assert_eq!(compass_direction(359.0), "north");
        assert_eq!(compass_direction(90.0), "east");
        assert_eq!(compass_direction(135.0), "southeast");
        assert_eq!(compass_direction(250.0), "west");
    }

    #[test]
    fn test_meters_to_degrees() {
        let (dlat, dlng) = meters_to_degrees(111_194.93, 0.0);
        assert!((dlat - 1.0).abs() < 1e-4);
        assert!((dlng - 1.0).abs() < 1e-4);

        let (_, dlng_north) = meters_to_degrees(1_000.0, 60.0);
        let (_, dlng_equator) = meters_to_degrees(1_000.0, 0.0);
        assert!((dlng_north / dlng_equator - 2.0).abs() < 1e-6);
    }
}
