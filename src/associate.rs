//! Proximity association of fetched features with sample points.
//!
//! A feature is a hit for a sample when its nearest *vertex* lies within the
//! route radius (inclusive). Interior points of long segments are not
//! considered, so a long way whose vertices are all far away can pass close
//! to a sample undetected. The adaptive radius is tuned around this.
//!
//! Vertices are bulk-loaded into an R-tree and each sample queries a
//! degree-space envelope slightly larger than its radius; the exact
//! haversine check then decides.

use std::collections::BTreeMap;

use log::debug;
use rstar::{RTree, RTreeObject, AABB};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::classify::CategoryFlags;
use crate::features::{Feature, MatchedFeature, SamplePoint};
use crate::geo_utils::{haversine_distance, meters_to_degrees};
use crate::GpsPoint;

/// Envelope padding so degree-space boxes never cut off a true hit.
const ENVELOPE_MARGIN: f64 = 1.05;

/// A feature vertex in the spatial index
#[derive(Debug, Clone, Copy)]
struct IndexedVertex {
    feature_index: usize,
    point: GpsPoint,
}

impl RTreeObject for IndexedVertex {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.point.latitude, self.point.longitude])
    }
}

/// Output of [`associate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub samples: Vec<SamplePoint>,
    pub global_flags: CategoryFlags,
}

struct VertexIndex<'a> {
    tree: RTree<IndexedVertex>,
    features: &'a [Feature],
}

impl<'a> VertexIndex<'a> {
    fn build(features: &'a [Feature]) -> Self {
        let vertices: Vec<IndexedVertex> = features
            .iter()
            .enumerate()
            .flat_map(|(feature_index, f)| {
                f.vertices()
                    .iter()
                    .filter(|p| p.is_valid())
                    .map(move |p| IndexedVertex {
                        feature_index,
                        point: *p,
                    })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(vertices),
            features,
        }
    }

    /// Nearest-vertex distance per feature, for features with a vertex near `center`.
    fn nearest_by_feature(&self, center: &GpsPoint, radius_meters: f64) -> BTreeMap<usize, f64> {
        let mut nearest: BTreeMap<usize, f64> = BTreeMap::new();
        let mut record = |feature_index: usize, point: &GpsPoint| {
            let d = haversine_distance(center, point);
            nearest
                .entry(feature_index)
                .and_modify(|best| *best = best.min(d))
                .or_insert(d);
        };

        match search_envelope(center, radius_meters) {
            Some(envelope) => {
                for v in self.tree.locate_in_envelope_intersecting(&envelope) {
                    record(v.feature_index, &v.point);
                }
            }
            None => {
                // Envelope wraps the antimeridian or a pole: scan everything
                for (feature_index, f) in self.features.iter().enumerate() {
                    for p in f.vertices().iter().filter(|p| p.is_valid()) {
                        record(feature_index, p);
                    }
                }
            }
        }

        nearest
    }
}

/// Degree-space box containing every point within `radius_meters` of `center`.
///
/// Returns `None` when the box would cross the antimeridian or reach a pole,
/// or when the inputs are not finite.
fn search_envelope(center: &GpsPoint, radius_meters: f64) -> Option<AABB<[f64; 2]>> {
    if !center.is_valid() || !radius_meters.is_finite() {
        return None;
    }
    let padded = radius_meters * ENVELOPE_MARGIN + 1.0;
    let (dlat, _) = meters_to_degrees(padded, center.latitude);
    let poleward_lat = center.latitude.abs() + dlat;
    if poleward_lat >= 89.0 {
        return None;
    }
    let (_, dlng) = meters_to_degrees(padded, poleward_lat);

    let min_lng = center.longitude - dlng;
    let max_lng = center.longitude + dlng;
    if min_lng < -180.0 || max_lng > 180.0 {
        return None;
    }

    Some(AABB::from_corners(
        [center.latitude - dlat, min_lng],
        [center.latitude + dlat, max_lng],
    ))
}

fn tag_sample(
    sample: &mut SamplePoint,
    index: &VertexIndex<'_>,
    categories: &[CategoryFlags],
    radius_meters: f64,
) {
    let nearest = index.nearest_by_feature(&sample.coordinate, radius_meters);
    for (feature_index, distance_meters) in nearest {
        if distance_meters <= radius_meters {
            sample.category_flags.merge(categories[feature_index]);
            sample.matched_features.push(MatchedFeature {
                feature_index,
                distance_meters,
            });
        }
    }
}

/// Tag every sample with the features within `radius_meters` and aggregate
/// the route-global flags.
///
/// Samples are returned in their input order. `global_flags` has a category
/// set iff at least one sample has it set.
pub fn associate(
    mut samples: Vec<SamplePoint>,
    radius_meters: f64,
    features: &[Feature],
) -> Association {
    let categories: Vec<CategoryFlags> = features.iter().map(Feature::categories).collect();
    let index = VertexIndex::build(features);

    #[cfg(feature = "parallel")]
    samples
        .par_iter_mut()
        .for_each(|s| tag_sample(s, &index, &categories, radius_meters));

    #[cfg(not(feature = "parallel"))]
    samples
        .iter_mut()
        .for_each(|s| tag_sample(s, &index, &categories, radius_meters));

    let global_flags = samples
        .iter()
        .fold(CategoryFlags::empty(), |mut acc, s| {
            acc.merge(s.category_flags);
            acc
        });

    debug!(
        "[Associate] {} samples x {} features, radius {:.0}m -> {} hits, global {:?}",
        samples.len(),
        features.len(),
        radius_meters,
        samples.iter().map(|s| s.matched_features.len()).sum::<usize>(),
        global_flags.iter().map(|c| c.name()).collect::<Vec<_>>()
    );

    Association {
        samples,
        global_flags,
    }
}
