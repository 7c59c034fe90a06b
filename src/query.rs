//! Logical feature query and Overpass encoding/decoding.
//!
//! The core decides *what* to ask for (tag predicates around each sample at
//! the route radius). Transport is left to a [`FeatureSource`](crate::FeatureSource);
//! the Overpass QL rendering and JSON decoding here are shared by the HTTP
//! client and by tests.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use geo::{BoundingRect, MultiPoint, Point};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::constants::QUERY_TIMEOUT_SECS;
use crate::error::{NarratorError, Result};
use crate::features::Feature;
use crate::{Bounds, GpsPoint};

/// A tag filter requested from the feature source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagPredicate {
    /// Key present with any value
    Has(String),
    /// Key equal to a value
    Equals(String, String),
}

impl TagPredicate {
    fn has(key: &str) -> Self {
        TagPredicate::Has(key.to_string())
    }

    fn equals(key: &str, value: &str) -> Self {
        TagPredicate::Equals(key.to_string(), value.to_string())
    }

    /// Overpass QL tag filter, e.g. `["natural"="water"]`.
    ///
    /// Keys and values are quoted, with `"` and `\` escaped.
    pub fn to_filter(&self) -> String {
        match self {
            TagPredicate::Has(key) => format!("[\"{}\"]", escape_ql(key)),
            TagPredicate::Equals(key, value) => {
                format!("[\"{}\"=\"{}\"]", escape_ql(key), escape_ql(value))
            }
        }
    }

    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        match self {
            TagPredicate::Has(key) => tags.contains_key(key),
            TagPredicate::Equals(key, value) => tags.get(key) == Some(value),
        }
    }
}

/// Escape a string for use inside an Overpass QL double-quoted literal.
fn escape_ql(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Predicates covering every classifier category.
pub fn default_predicates() -> Vec<TagPredicate> {
    vec![
        TagPredicate::equals("natural", "water"),
        TagPredicate::has("water"),
        TagPredicate::has("waterway"),
        TagPredicate::equals("landuse", "forest"),
        TagPredicate::equals("leisure", "park"),
        TagPredicate::has("highway"),
        TagPredicate::has("railway"),
        TagPredicate::has("building"),
        TagPredicate::equals("natural", "peak"),
    ]
}

/// What to fetch: features matching any predicate within `radius_meters`
/// of any point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureQuery {
    pub points: Vec<GpsPoint>,
    pub radius_meters: f64,
    pub predicates: Vec<TagPredicate>,
    pub timeout_secs: u32,
}

impl FeatureQuery {
    pub fn new(points: Vec<GpsPoint>, radius_meters: f64) -> Self {
        Self {
            points,
            radius_meters,
            predicates: default_predicates(),
            timeout_secs: QUERY_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Bounding box of the sample points (radius not included).
    pub fn bounds(&self) -> Option<Bounds> {
        let multi: MultiPoint<f64> = self
            .points
            .iter()
            .map(|p| Point::new(p.longitude, p.latitude))
            .collect();
        multi.bounding_rect().map(|rect| Bounds {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lng: rect.min().x,
            max_lng: rect.max().x,
        })
    }

    /// Render as an Overpass QL union, one `around` clause per point and
    /// predicate, returning full geometry.
    ///
    /// # Example
    /// ```
    /// use route_narrator::{FeatureQuery, GpsPoint};
    ///
    /// let q = FeatureQuery::new(vec![GpsPoint::new(46.5, 7.9)], 300.0);
    /// let ql = q.to_overpass_ql();
    /// assert!(ql.contains(r#"nwr(around:300,46.5,7.9)["natural"="peak"];"#));
    /// assert!(ql.ends_with("out geom;"));
    /// ```
    pub fn to_overpass_ql(&self) -> String {
        let mut ql = format!("[out:json][timeout:{}];\n(\n", self.timeout_secs);
        let radius = self.radius_meters.round().max(1.0);
        for p in &self.points {
            for predicate in &self.predicates {
                // Writing to a String cannot fail
                let _ = writeln!(
                    ql,
                    "  nwr(around:{},{},{}){};",
                    radius,
                    p.latitude,
                    p.longitude,
                    predicate.to_filter()
                );
            }
        }
        ql.push_str(");\nout geom;");
        ql
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    element_type: String,
    #[serde(default)]
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    geometry: Vec<Option<OverpassLatLon>>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassLatLon {
    lat: f64,
    lon: f64,
}

impl OverpassElement {
    fn into_feature(self) -> Result<Option<Feature>> {
        match self.element_type.as_str() {
            "node" => {
                let (lat, lon) = self.lat.zip(self.lon).ok_or_else(|| {
                    malformed(format!("node {} missing coordinates", self.id))
                })?;
                let position = GpsPoint::new(lat, lon);
                if !position.is_valid() {
                    return Err(malformed(format!("node {} has invalid coordinates", self.id)));
                }
                Ok(Some(Feature::node(self.id, self.tags, position)))
            }
            "way" => {
                // Overpass emits null entries for vertices outside the query area
                let vertices: Vec<GpsPoint> = self
                    .geometry
                    .into_iter()
                    .flatten()
                    .map(|g| GpsPoint::new(g.lat, g.lon))
                    .collect();
                if vertices.is_empty() {
                    return Err(malformed(format!("way {} has no geometry", self.id)));
                }
                if let Some(bad) = vertices.iter().find(|p| !p.is_valid()) {
                    return Err(malformed(format!(
                        "way {} has invalid vertex ({}, {})",
                        self.id, bad.latitude, bad.longitude
                    )));
                }
                Ok(Some(Feature::way(self.id, self.tags, vertices)))
            }
            other => {
                debug!("[Query] Skipping {} element {}", other, self.id);
                Ok(None)
            }
        }
    }
}

fn malformed(message: String) -> NarratorError {
    NarratorError::FeatureFetchFailed {
        message: format!("malformed payload: {}", message),
    }
}

/// Decode an Overpass JSON response into features.
///
/// Nodes need `lat`/`lon`, ways need a non-empty `geometry`; relations and
/// other element types are skipped. Anything else is a
/// [`NarratorError::FeatureFetchFailed`].
pub fn parse_overpass_json(body: &str) -> Result<Vec<Feature>> {
    let response: OverpassResponse = serde_json::from_str(body).map_err(|e| {
        warn!("[Query] Overpass response did not parse: {}", e);
        malformed(e.to_string())
    })?;

    let mut features = Vec::with_capacity(response.elements.len());
    for element in response.elements {
        if let Some(feature) = element.into_feature()? {
            features.push(feature);
        }
    }
    Ok(features)
}
