//! # Route Narrator
//!
//! Turns a straight-line route between two points into commentary.
//!
//! This library provides:
//! - Even sampling of the great-circle segment with a distance-scaled search radius
//! - OSM tag classification into a small category set
//! - Proximity association of fetched features to sample points (R-tree prefilter)
//! - Summary and per-sample message composition
//! - A timed playback engine that fires commentary as a virtual marker advances
//!
//! ## Features
//!
//! - **`parallel`** - Associate samples in parallel with rayon
//! - **`http`** - Overpass feature source and Nominatim geocoder
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use route_narrator::{Feature, GpsPoint, NarratorConfig, SessionState};
//!
//! let start = GpsPoint::new(0.0, 0.0);
//! let end = GpsPoint::new(0.0, 1.0);
//! let lake = Feature::node(
//!     1,
//!     BTreeMap::from([("natural".to_string(), "water".to_string())]),
//!     GpsPoint::new(0.0, 0.5),
//! );
//!
//! let mut session = SessionState::new(NarratorConfig::default()).unwrap();
//! session
//!     .analyze_with_features(Some(start), Some(end), Ok(vec![lake]))
//!     .unwrap();
//! assert!(session.summary().unwrap().contains("water"));
//!
//! let run_id = session.start_playback().unwrap();
//! let events = session.tick(run_id, 0);
//! assert!(!events.is_empty());
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{NarratorError, OptionExt, Result};

// Tunable defaults
pub mod constants;

// Spherical helpers (distance, bearing, interpolation)
pub mod geo_utils;

// Route sampling
pub mod sampler;
pub use sampler::{compute_sample_plan, sample_count, sample_radius, SamplePlan, SamplerConfig};

// OSM tag classification
pub mod classify;
pub use classify::{classify, Category, CategoryFlags};

// Feature and analysis data model
pub mod features;
pub use features::{
    Feature, FeatureKind, FeatureShape, MatchedFeature, RouteAnalysis, SamplePoint,
};

// Sample/feature proximity association
pub mod associate;
pub use associate::{associate, Association};

// Message composition
pub mod compose;
pub use compose::{
    compose_for_sample, compose_summary, sample_key, summary_key, Embellisher, SampleKey,
    SummaryKey,
};

// Logical feature query and Overpass payload decoding
pub mod query;
pub use query::{default_predicates, parse_overpass_json, FeatureQuery, TagPredicate};

// Playback state machine
pub mod playback;
pub use playback::{
    PlaybackConfig, PlaybackEngine, PlaybackEvent, PlaybackState, PlaybackStatus, TriggerKind,
};

// Tokio tick task
pub mod ticker;
pub use ticker::{spawn_ticker, PlaybackTicker};

// Configuration
pub mod config;
pub use config::{NarratorConfig, QueryConfig};

// Collaborator traits and in-memory implementations
pub mod source;
pub use source::{
    FailingFeatureSource, FeatureSource, Geocoder, StaticFeatureSource, StaticGeocoder,
};

// Session orchestration
pub mod session;
pub use session::{build_analysis, SessionState};

// HTTP collaborators (Overpass, Nominatim)
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{NominatimClient, OverpassClient};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_narrator::GpsPoint;
/// let point = GpsPoint::new(46.6863, 7.8632); // Interlaken
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Axis-aligned bounding box in degrees, see [`FeatureQuery::bounds`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}
