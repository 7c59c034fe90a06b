//! Geographic features, tagged sample points and the route analysis result.

use std::collections::BTreeMap;

use geo::{Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::classify::{classify, Category, CategoryFlags};
use crate::GpsPoint;

/// Element kind as reported by the feature source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Way,
    Node,
}

/// Geometry of a feature: a vertex list for ways, a single coordinate for nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureShape {
    Way(Vec<GpsPoint>),
    Node(GpsPoint),
}

/// A tagged geographic object returned by one feature fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Source element id (0 when the source has none)
    pub id: i64,
    pub tags: BTreeMap<String, String>,
    pub shape: FeatureShape,
}

impl Feature {
    /// Create a way feature from its vertices.
    pub fn way(id: i64, tags: BTreeMap<String, String>, vertices: Vec<GpsPoint>) -> Self {
        Self {
            id,
            tags,
            shape: FeatureShape::Way(vertices),
        }
    }

    /// Create a point feature.
    pub fn node(id: i64, tags: BTreeMap<String, String>, position: GpsPoint) -> Self {
        Self {
            id,
            tags,
            shape: FeatureShape::Node(position),
        }
    }

    pub fn kind(&self) -> FeatureKind {
        match self.shape {
            FeatureShape::Way(_) => FeatureKind::Way,
            FeatureShape::Node(_) => FeatureKind::Node,
        }
    }

    /// Geometry as a coordinate sequence (singleton for nodes).
    pub fn vertices(&self) -> &[GpsPoint] {
        match &self.shape {
            FeatureShape::Way(vertices) => vertices,
            FeatureShape::Node(position) => std::slice::from_ref(position),
        }
    }

    /// First vertex outside the valid coordinate range, if any.
    pub fn invalid_vertex(&self) -> Option<&GpsPoint> {
        self.vertices().iter().find(|p| !p.is_valid())
    }

    /// Categories this feature's tags map to.
    pub fn categories(&self) -> CategoryFlags {
        classify(&self.tags)
    }

    /// Display name from the `name` tag, if any.
    pub fn name(&self) -> Option<&str> {
        self.tags.get("name").map(String::as_str)
    }

    /// Geometry as a `geo` line string (x = longitude, y = latitude) for map overlays.
    pub fn to_line_string(&self) -> LineString<f64> {
        LineString::new(
            self.vertices()
                .iter()
                .map(|p| Coord {
                    x: p.longitude,
                    y: p.latitude,
                })
                .collect(),
        )
    }
}

/// A feature hit recorded on a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchedFeature {
    /// Index into [`RouteAnalysis::raw_features`]
    pub feature_index: usize,
    /// Nearest-vertex distance from the sample in meters
    pub distance_meters: f64,
}

/// One sample coordinate along the route and what was found around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Position in route order (0-based)
    pub index: usize,
    pub coordinate: GpsPoint,
    pub category_flags: CategoryFlags,
    /// Hits in feature order
    pub matched_features: Vec<MatchedFeature>,
}

impl SamplePoint {
    pub fn new(index: usize, coordinate: GpsPoint) -> Self {
        Self {
            index,
            coordinate,
            category_flags: CategoryFlags::empty(),
            matched_features: Vec::new(),
        }
    }

    pub fn has(&self, category: Category) -> bool {
        self.category_flags.contains(category)
    }
}

/// Result of analyzing one route.
///
/// Produced once per analysis and never mutated afterwards; the next
/// analysis replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAnalysis {
    pub start: GpsPoint,
    pub end: GpsPoint,
    /// Straight-line distance between start and end
    pub distance_meters: f64,
    /// Proximity radius shared by every sample
    pub radius_meters: f64,
    /// OR of every sample's flags
    pub global_flags: CategoryFlags,
    /// Set when the feature fetch failed; samples and features are then empty
    pub error_flag: bool,
    pub error_message: Option<String>,
    pub samples: Vec<SamplePoint>,
    pub raw_features: Vec<Feature>,
}

impl RouteAnalysis {
    /// Analysis for a route whose feature fetch failed.
    pub fn failed(
        start: GpsPoint,
        end: GpsPoint,
        distance_meters: f64,
        radius_meters: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            start,
            end,
            distance_meters,
            radius_meters,
            global_flags: CategoryFlags::empty(),
            error_flag: true,
            error_message: Some(message.into()),
            samples: Vec::new(),
            raw_features: Vec::new(),
        }
    }

    /// Features matched by a sample, with their distances.
    pub fn matches_for(&self, sample_index: usize) -> Vec<(&Feature, f64)> {
        self.samples
            .get(sample_index)
            .map(|sample| {
                sample
                    .matched_features
                    .iter()
                    .filter_map(|m| {
                        self.raw_features
                            .get(m.feature_index)
                            .map(|f| (f, m.distance_meters))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True when playback can run on this analysis.
    pub fn is_playable(&self) -> bool {
        !self.error_flag && !self.samples.is_empty()
    }
}
