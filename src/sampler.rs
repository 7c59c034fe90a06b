//! Adaptive sample point generation along a straight-line route.
//!
//! Longer routes get more samples (up to a cap) and a wider proximity radius,
//! so the same number of feature lookups covers more ground.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::constants::{
    MAX_RADIUS_METERS, MAX_SAMPLES, MIN_RADIUS_METERS, MIN_SAMPLES, RADIUS_DIVISOR,
    SAMPLE_DENSITY_PER_KM,
};
use crate::error::{NarratorError, Result};
use crate::geo_utils::{haversine_distance, interpolate};
use crate::GpsPoint;

/// Configuration for sample plan generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Minimum number of sample points. Default: 4
    pub min_samples: usize,
    /// Maximum number of sample points. Default: 13
    pub max_samples: usize,
    /// Samples per kilometer before clamping. Default: 2.5
    pub density_per_km: f64,
    /// Minimum proximity radius in meters. Default: 120
    pub min_radius_meters: f64,
    /// Maximum proximity radius in meters. Default: 1000
    pub max_radius_meters: f64,
    /// Route distance divisor for the radius. Default: 9
    pub radius_divisor: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_samples: MIN_SAMPLES,
            max_samples: MAX_SAMPLES,
            density_per_km: SAMPLE_DENSITY_PER_KM,
            min_radius_meters: MIN_RADIUS_METERS,
            max_radius_meters: MAX_RADIUS_METERS,
            radius_divisor: RADIUS_DIVISOR,
        }
    }
}

impl SamplerConfig {
    /// Check that the bounds are ordered and the factors are usable.
    pub fn validate(&self) -> Result<()> {
        if self.min_samples == 0 || self.min_samples > self.max_samples {
            return Err(NarratorError::ConfigError {
                message: format!(
                    "sample bounds must satisfy 0 < min ({}) <= max ({})",
                    self.min_samples, self.max_samples
                ),
            });
        }
        if !(self.min_radius_meters > 0.0 && self.min_radius_meters <= self.max_radius_meters) {
            return Err(NarratorError::ConfigError {
                message: format!(
                    "radius bounds must satisfy 0 < min ({}) <= max ({})",
                    self.min_radius_meters, self.max_radius_meters
                ),
            });
        }
        if !(self.density_per_km > 0.0 && self.radius_divisor > 0.0) {
            return Err(NarratorError::ConfigError {
                message: "density and radius divisor must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Sample points and proximity radius for one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePlan {
    /// Number of sample points
    pub count: usize,
    /// Proximity radius shared by every sample
    pub radius_meters: f64,
    /// Straight-line route distance
    pub distance_meters: f64,
    /// Interior points ordered from start to end
    pub points: Vec<GpsPoint>,
}

/// Number of samples for a route of `distance_meters`.
pub fn sample_count(distance_meters: f64, config: &SamplerConfig) -> usize {
    let raw = (distance_meters / 1000.0 * config.density_per_km).ceil();
    if raw.is_nan() || raw <= 0.0 {
        return config.min_samples;
    }
    // Saturating float->int cast keeps absurd distances at the cap
    (raw as usize).clamp(config.min_samples, config.max_samples)
}

/// Proximity radius for a route of `distance_meters`.
pub fn sample_radius(distance_meters: f64, config: &SamplerConfig) -> f64 {
    let raw = distance_meters / config.radius_divisor;
    if raw.is_nan() {
        return config.min_radius_meters;
    }
    raw.clamp(config.min_radius_meters, config.max_radius_meters)
}

/// Build the sample plan between `start` and `end`.
///
/// Point `i` (1-based) sits at `t = i / (count + 1)`, so points never coincide
/// with the endpoints and are ordered by increasing `t`.
///
/// # Example
/// ```
/// use route_narrator::{compute_sample_plan, GpsPoint, SamplerConfig};
///
/// let plan = compute_sample_plan(
///     &GpsPoint::new(0.0, 0.0),
///     &GpsPoint::new(0.0, 1.0),
///     &SamplerConfig::default(),
/// );
/// assert_eq!(plan.count, 13);
/// assert_eq!(plan.radius_meters, 1000.0);
/// ```
pub fn compute_sample_plan(start: &GpsPoint, end: &GpsPoint, config: &SamplerConfig) -> SamplePlan {
    let distance_meters = haversine_distance(start, end);
    let count = sample_count(distance_meters, config);
    let radius_meters = sample_radius(distance_meters, config);

    let points: Vec<GpsPoint> = (1..=count)
        .map(|i| interpolate(start, end, i as f64 / (count + 1) as f64))
        .collect();

    debug!(
        "[Sampler] {:.0}m route -> {} samples, radius {:.0}m",
        distance_meters, count, radius_meters
    );

    SamplePlan {
        count,
        radius_meters,
        distance_meters,
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_of_km(km: f64) -> (GpsPoint, GpsPoint) {
        // One degree of longitude on the equator is ~111.195km
        (GpsPoint::new(0.0, 0.0), GpsPoint::new(0.0, km / 111.19493))
    }

    #[test]
    fn test_count_bounds_and_monotonic() {
        let config = SamplerConfig::default();
        let mut previous = 0;
        for i in 0..400 {
            let d = i as f64 * 25.0;
            let count = sample_count(d, &config);
            assert!(count >= config.min_samples && count <= config.max_samples);
            assert!(count >= previous, "count decreased at {}m", d);
            previous = count;
        }
        assert_eq!(sample_count(0.0, &config), MIN_SAMPLES);
        assert_eq!(sample_count(1.0e9, &config), MAX_SAMPLES);
        assert_eq!(sample_count(f64::INFINITY, &config), MAX_SAMPLES);
    }

    #[test]
    fn test_count_density() {
        let config = SamplerConfig::default();
        // 2km * 2.5/km = 5
        assert_eq!(sample_count(2_000.0, &config), 5);
        // 4.1km -> ceil(10.25) = 11
        assert_eq!(sample_count(4_100.0, &config), 11);
    }

    #[test]
    fn test_radius_bounds() {
        let config = SamplerConfig::default();
        for i in 0..200 {
            let d = i as f64 * 97.0;
            let r = sample_radius(d, &config);
            assert!(r >= MIN_RADIUS_METERS && r <= MAX_RADIUS_METERS);
        }
        assert_eq!(sample_radius(50.0, &config), MIN_RADIUS_METERS);
        assert_eq!(sample_radius(4_500.0, &config), 500.0);
        assert_eq!(sample_radius(1.0e7, &config), MAX_RADIUS_METERS);
    }

    #[test]
    fn test_points_strictly_interior_and_ordered() {
        let (start, end) = route_of_km(3.0);
        let plan = compute_sample_plan(&start, &end, &SamplerConfig::default());

        assert_eq!(plan.points.len(), plan.count);
        let mut last = start.longitude;
        for p in &plan.points {
            assert!(p.longitude > last);
            assert!(p.longitude < end.longitude);
            assert_eq!(p.latitude, 0.0);
            last = p.longitude;
        }
    }

    #[test]
    fn test_midpoint_sample_on_long_route() {
        let plan = compute_sample_plan(
            &GpsPoint::new(0.0, 0.0),
            &GpsPoint::new(0.0, 1.0),
            &SamplerConfig::default(),
        );
        assert_eq!(plan.count, 13);
        assert_eq!(plan.points[6], GpsPoint::new(0.0, 0.5));
        assert!((plan.distance_meters - 111_194.93).abs() < 0.1);
    }

    #[test]
    fn test_degenerate_route() {
        let p = GpsPoint::new(46.0, 7.0);
        let plan = compute_sample_plan(&p, &p, &SamplerConfig::default());
        assert_eq!(plan.count, MIN_SAMPLES);
        assert_eq!(plan.radius_meters, MIN_RADIUS_METERS);
        assert!(plan.points.iter().all(|q| *q == p));
    }

    #[test]
    fn test_config_validation() {
        assert!(SamplerConfig::default().validate().is_ok());

        let bad = SamplerConfig {
            min_samples: 20,
            ..SamplerConfig::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(NarratorError::ConfigError { .. })
        ));

        let bad = SamplerConfig {
            min_radius_meters: 2_000.0,
            ..SamplerConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
