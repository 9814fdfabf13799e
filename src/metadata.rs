//! Document metadata: creator label, start and end of a recording,
//! reverse-geocoded start location and wall-clock localization.
//!
//! Geocoding and time zone resolution are collaborators behind the
//! [`Geocoder`] and [`TimezoneLookup`] traits; this module only decides
//! which point to ask about and how to clean the answer.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::time::is_plausible;
use crate::{Document, Point};

// ============================================================================
// Creator
// ============================================================================

/// Substring of a creator field and the label it maps to, checked in order.
const CREATOR_LABELS: &[(&str, &str)] = &[
    ("Garmin", "Garmin"),
    ("Strava", "Strava"),
    ("eTrex", "Garmin"),
    ("Runkeeper", "Runkeeper"),
    ("Endomondo", "Endomondo"),
    ("Runtastic", "Runtastic"),
    ("Polar", "Polar"),
    ("TomTom", "TomTom"),
    ("Suunto", "Suunto"),
    ("Movescount", "Suunto"),
    ("Fitbit", "Fitbit"),
    ("Wahoo", "Wahoo"),
    ("Bryton", "Bryton"),
    ("Cateye", "Cateye"),
    ("Coros", "Coros"),
    ("Hammerhead", "Hammerhead"),
    ("Lezyne", "Lezyne"),
    ("Mio", "Mio"),
    ("Sigma", "Sigma"),
    ("Stages", "Stages"),
    ("Tacx", "Tacx"),
    ("Timex", "Timex"),
    ("Xplova", "Xplova"),
    ("Zwift", "Zwift"),
    ("Wikiloc", "Wikiloc"),
    ("GPSBabel", "GPSBabel"),
    ("Locus", "Locus"),
    ("Viking", "Viking"),
    ("OsmAnd", "OsmAnd"),
    ("AllTrails", "AllTrails"),
    ("ExifTool", "ExifTool"),
    ("togpx", "ToGPX"),
    ("OziExplorer", "OziExplorer"),
    ("Graphhopper", "Graphhopper"),
    ("Google", "Google"),
    ("nawagers", "Nawagers"),
    ("Mapas de España", "OruxMaps"),
];

/// Canonical vendor label of a free-text creator field.
///
/// OruxMaps writes its version into the field, which is kept verbatim.
/// Empty or unrecognised creators are `"Unknown"`.
///
/// # Example
/// ```
/// use track_repair::creator_label;
/// assert_eq!(creator_label("Garmin Connect"), "Garmin");
/// assert_eq!(creator_label(""), "Unknown");
/// ```
pub fn creator_label(raw: &str) -> String {
    if raw.contains("OruxMaps") {
        return raw.to_string();
    }
    CREATOR_LABELS
        .iter()
        .find(|(needle, _)| raw.contains(needle))
        .map_or("Unknown", |(_, label)| *label)
        .to_string()
}

// ============================================================================
// Time zones
// ============================================================================

/// Resolves the IANA zone name at a position; an empty name means unknown.
pub trait TimezoneLookup: Send + Sync {
    fn zone(&self, latitude: f64, longitude: f64) -> String;
}

/// Convert `time` to the wall-clock time of the zone at (lat, lon).
///
/// The result is the local wall-clock reading stored in a UTC value, so
/// recordings from devices that wrote local time compare directly. Without
/// a lookup, or for unknown zone names, `time` is returned unchanged.
pub fn localize(
    time: DateTime<Utc>,
    latitude: f64,
    longitude: f64,
    zones: Option<&dyn TimezoneLookup>,
) -> DateTime<Utc> {
    let Some(zones) = zones else {
        return time;
    };
    let name = zones.zone(latitude, longitude);
    if name.is_empty() {
        return time;
    }
    match name.parse::<Tz>() {
        Ok(tz) => time.with_timezone(&tz).naive_local().and_utc(),
        Err(_) => {
            debug!("[Metadata] Unknown time zone '{}'", name);
            time
        }
    }
}

// ============================================================================
// Start and end
// ============================================================================

/// First point with a usable position.
pub fn start_position(doc: &Document) -> Option<Point> {
    doc.points().find(|p| p.has_position()).copied()
}

/// Last point with a usable position.
pub fn end_position(doc: &Document) -> Option<Point> {
    doc.tracks
        .iter()
        .rev()
        .flat_map(|t| t.points().iter().rev())
        .find(|p| p.has_position())
        .copied()
}

fn timed(point: &Point, zones: Option<&dyn TimezoneLookup>) -> Option<DateTime<Utc>> {
    match point.time {
        Some(t) if is_plausible(t) && point.has_position() => {
            Some(localize(t, point.latitude, point.longitude, zones))
        }
        _ => None,
    }
}

/// Localized time of the first point with a plausible time and a position.
pub fn start_time(doc: &Document, zones: Option<&dyn TimezoneLookup>) -> Option<DateTime<Utc>> {
    doc.points().find_map(|p| timed(p, zones))
}

/// Localized time of the last point with a plausible time and a position.
pub fn end_time(doc: &Document, zones: Option<&dyn TimezoneLookup>) -> Option<DateTime<Utc>> {
    doc.tracks
        .iter()
        .rev()
        .flat_map(|t| t.points().iter().rev())
        .find_map(|p| timed(p, zones))
}

/// True when any point carries a timestamp.
pub fn has_any_time(doc: &Document) -> bool {
    doc.points().any(|p| p.time.is_some())
}

// ============================================================================
// Reverse geocoding
// ============================================================================

/// A reverse-geocoded address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub country: String,
    pub country_code: String,
    pub city: String,
    pub state: String,
}

impl Address {
    /// Placeholder used when no location could be determined.
    pub fn missing() -> Self {
        Self {
            country: "Missing".to_string(),
            country_code: "XX".to_string(),
            city: "Missing".to_string(),
            state: "Missing".to_string(),
        }
    }

    /// Trim names and replace path separators so they are safe in paths.
    fn cleaned(self) -> Self {
        Self {
            country: clean_name(&self.country),
            country_code: self.country_code,
            city: clean_name(&self.city),
            state: clean_name(&self.state),
        }
    }
}

fn clean_name(name: &str) -> String {
    name.trim().replace(['/', ':', '\\', '.'], "_")
}

/// Reverse geocoding collaborator.
pub trait Geocoder: Send + Sync {
    fn lookup(&self, latitude: f64, longitude: f64) -> Result<Address>;
}

/// Cleaned address of the first usable point.
///
/// Fails with [`TrackError::LocationNotFound`] when no point has a usable
/// position, and with [`TrackError::Geocoding`] when the geocoder fails;
/// callers usually fall back to [`Address::missing`].
pub fn location_start(doc: &Document, geocoder: &dyn Geocoder) -> Result<Address> {
    let start = start_position(doc).ok_or(TrackError::LocationNotFound)?;
    let address = geocoder
        .lookup(start.latitude, start.longitude)
        .map_err(|e| match e {
            TrackError::Geocoding { .. } => e,
            other => TrackError::Geocoding {
                message: other.to_string(),
            },
        })?;
    Ok(address.cleaned())
}
