//! Collaborator seams: where features and coordinates come from.
//!
//! The session only depends on these traits. The `http` feature provides
//! Overpass/Nominatim implementations; the in-memory ones here serve hosts
//! that already hold data, and tests.

use std::collections::HashMap;
use std::future::Future;

use crate::error::{NarratorError, Result};
use crate::features::Feature;
use crate::query::FeatureQuery;
use crate::GpsPoint;

/// Fetches raw features for a logical query.
pub trait FeatureSource {
    /// Fetch every feature matching `query`.
    ///
    /// Transport and payload errors are reported as
    /// [`NarratorError::FeatureFetchFailed`] or [`NarratorError::HttpError`].
    fn fetch_features(
        &self,
        query: &FeatureQuery,
    ) -> impl Future<Output = Result<Vec<Feature>>> + Send;
}

/// Resolves a place name to a coordinate.
pub trait Geocoder {
    /// `Ok(None)` means the service answered but knows no such place.
    fn geocode(&self, place: &str) -> impl Future<Output = Result<Option<GpsPoint>>> + Send;
}

/// Feature source returning a fixed set of features for every query.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureSource {
    features: Vec<Feature>,
}

impl StaticFeatureSource {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }
}

impl FeatureSource for StaticFeatureSource {
    async fn fetch_features(&self, _query: &FeatureQuery) -> Result<Vec<Feature>> {
        Ok(self.features.clone())
    }
}

/// Feature source that always fails, for exercising the error path.
#[derive(Debug, Clone)]
pub struct FailingFeatureSource {
    message: String,
}

impl FailingFeatureSource {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl FeatureSource for FailingFeatureSource {
    async fn fetch_features(&self, _query: &FeatureQuery) -> Result<Vec<Feature>> {
        Err(NarratorError::FeatureFetchFailed {
            message: self.message.clone(),
        })
    }
}

/// Geocoder backed by a name -> coordinate table (names compared case-insensitively).
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    places: HashMap<String, GpsPoint>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(mut self, name: &str, point: GpsPoint) -> Self {
        self.places.insert(name.trim().to_lowercase(), point);
        self
    }
}

impl Geocoder for StaticGeocoder {
    async fn geocode(&self, place: &str) -> Result<Option<GpsPoint>> {
        Ok(self.places.get(&place.trim().to_lowercase()).copied())
    }
}
