//! Unified error handling for the route-narrator library.
//!
//! Every fallible operation returns [`Result`]. Fetch failures are the one
//! exception at the analysis boundary: they are folded into
//! [`RouteAnalysis::error_flag`](crate::RouteAnalysis) instead of propagating.

use thiserror::Error;

/// Unified error type for route-narrator operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NarratorError {
    /// Start or end of the route was not supplied
    #[error("Missing route input: {what}")]
    InsufficientInput { what: String },

    /// A coordinate lies outside the valid latitude/longitude range
    #[error("Invalid coordinates: {message}")]
    InvalidCoordinates { message: String },

    /// The geocoding collaborator could not resolve a place name
    #[error("Place '{place}' could not be found")]
    GeocodeNotFound { place: String },

    /// Network/service error or malformed payload from the feature source
    #[error("Feature fetch failed: {message}")]
    FeatureFetchFailed { message: String },

    /// Playback was requested before any route was analyzed
    #[error("No route has been drawn")]
    NoRouteDrawn,

    /// Playback was requested for a route without usable samples
    #[error("No samples available for playback")]
    NoSamplesAvailable,

    /// HTTP transport error
    #[error("HTTP error{}: {message}", status_suffix(.status_code))]
    HttpError {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code.map(|code| format!(" ({})", code)).unwrap_or_default()
}

impl NarratorError {
    /// True for errors the caller can recover from by retrying with new input.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, NarratorError::ConfigError { .. })
    }
}

/// Result type alias for route-narrator operations.
pub type Result<T> = std::result::Result<T, NarratorError>;

/// Extension trait for converting Option to NarratorError.
pub trait OptionExt<T> {
    /// Convert a missing route endpoint into an insufficient input error.
    fn ok_or_missing(self, what: &str) -> Result<T>;

    /// Convert an unresolved place into a geocode error.
    fn ok_or_not_found(self, place: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_missing(self, what: &str) -> Result<T> {
        self.ok_or_else(|| NarratorError::InsufficientInput {
            what: what.to_string(),
        })
    }

    fn ok_or_not_found(self, place: &str) -> Result<T> {
        self.ok_or_else(|| NarratorError::GeocodeNotFound {
            place: place.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NarratorError::GeocodeNotFound {
            place: "Atlantis".to_string(),
        };
        assert!(err.to_string().contains("Atlantis"));

        let err = NarratorError::HttpError {
            message: "gateway timeout".to_string(),
            status_code: Some(504),
        };
        assert_eq!(err.to_string(), "HTTP error (504): gateway timeout");

        let err = NarratorError::HttpError {
            message: "connection reset".to_string(),
            status_code: None,
        };
        assert_eq!(err.to_string(), "HTTP error: connection reset");
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_missing("start");
        assert!(matches!(
            result,
            Err(NarratorError::InsufficientInput { .. })
        ));

        let result = None::<i32>.ok_or_not_found("Nowhere");
        assert_eq!(
            result,
            Err(NarratorError::GeocodeNotFound {
                place: "Nowhere".to_string()
            })
        );
        assert_eq!(Some(3).ok_or_missing("end"), Ok(3));
    }

    #[test]
    fn test_recoverable() {
        assert!(NarratorError::NoSamplesAvailable.is_recoverable());
        assert!(!NarratorError::ConfigError {
            message: "bad".to_string()
        }
        .is_recoverable());
    }
}
