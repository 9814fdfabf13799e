//! Unified error handling for the track-repair library.
//!
//! Point-level problems (missing elevation, missing timestamps) are not
//! errors: they are modelled as `None` fields and drive the passes'
//! conditional logic. This type covers the failures a caller has to act on:
//! bad configuration, unavailable collaborators and cancellation.

use thiserror::Error;

/// Unified error type for track-repair operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    /// A configuration value is unusable
    #[error("Configuration error: {message}")]
    InvalidConfig { message: String },

    /// A threshold that must be zero or positive was negative
    #[error("Threshold '{name}' must not be negative (got {value})")]
    NegativeThreshold { name: String, value: f64 },

    /// Duplicate detection was requested with every tolerance set to zero
    #[error("No duplicate rule enabled: set at least one time or position tolerance")]
    NoRuleEnabled,

    /// The document has no points to work on
    #[error("Document has no points")]
    EmptyDocument,

    /// The reference elevation source could not supply any sample
    #[error("Reference elevation unavailable: {message}")]
    ElevationUnavailable { message: String },

    /// No point of the document has a usable position
    #[error("No location found")]
    LocationNotFound,

    /// The reverse geocoding collaborator failed
    #[error("Geocoding failed: {message}")]
    Geocoding { message: String },

    /// HTTP/API error from a remote collaborator
    #[error("{}", http_message(.message, .status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// A configuration file could not be read or parsed
    #[error("Config file '{path}': {message}")]
    ConfigFile { path: String, message: String },

    /// The caller cancelled the run (or its deadline expired)
    #[error("Cancelled after {completed_passes} completed pass(es)")]
    Cancelled { completed_passes: usize },
}

fn http_message(message: &str, status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!("HTTP error ({}): {}", code, message),
        None => format!("HTTP error: {}", message),
    }
}

/// Result type alias for track-repair operations.
pub type Result<T> = std::result::Result<T, TrackError>;

impl TrackError {
    /// Shorthand for an [`TrackError::InvalidConfig`] error.
    pub fn config(message: impl Into<String>) -> Self {
        TrackError::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Reject negative values for a named threshold.
pub fn ensure_non_negative(name: &str, value: f64) -> Result<()> {
    if value < 0.0 || value.is_nan() {
        return Err(TrackError::NegativeThreshold {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

/// Extension trait for converting Option to TrackError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an elevation-unavailable error.
    fn ok_or_elevation_unavailable(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_elevation_unavailable(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackError::ElevationUnavailable {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackError::NegativeThreshold {
            name: "max_distance".to_string(),
            value: -1.0,
        };
        assert!(err.to_string().contains("max_distance"));
        assert!(err.to_string().contains("-1"));

        let err = TrackError::Http {
            message: "bad gateway".to_string(),
            status_code: Some(502),
        };
        assert_eq!(err.to_string(), "HTTP error (502): bad gateway");
    }

    #[test]
    fn test_ensure_non_negative() {
        assert!(ensure_non_negative("a", 0.0).is_ok());
        assert!(ensure_non_negative("a", 3.5).is_ok());
        assert!(matches!(
            ensure_non_negative("a", -0.1),
            Err(TrackError::NegativeThreshold { .. })
        ));
        assert!(ensure_non_negative("a", f64::NAN).is_err());
    }

    #[test]
    fn test_option_ext() {
        assert!(matches!(
            None::<f64>.ok_or_elevation_unavailable("no samples"),
            Err(TrackError::ElevationUnavailable { .. })
        ));
        assert_eq!(Some(4.0).ok_or_elevation_unavailable("unused"), Ok(4.0));
    }
}
