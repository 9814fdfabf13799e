//! # Track Repair
//!
//! GPS track cleaning, quality scoring and activity classification.
//!
//! This library provides:
//! - Point-repair passes that remove recording artifacts (noise, stops,
//!   self-intersecting loops, speed and elevation spikes)
//! - Timestamp reconstruction and elevation reconciliation
//! - A 0-100 quality score and an activity classifier
//! - Duplicate detection across a batch of recordings
//!
//! Every pass reports [`Finding`]s and only mutates the [`Document`] when
//! called with `fix = true`.
//!
//! ## Features
//!
//! - **`parallel`** - Process batches in parallel with rayon
//! - **`http`** - HTTP-backed reference elevation source
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use track_repair::{classify, ClassifierOptions, Document, Point, Track};
//!
//! let start = Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap();
//! let points: Vec<Point> = (0..100)
//!     .map(|i| {
//!         Point::new(45.0 + i as f64 * 0.000045, 7.0)
//!             .with_elevation(200.0)
//!             .with_time(start + Duration::seconds(i))
//!     })
//!     .collect();
//!
//! let doc = Document::new("Garmin Edge 530", vec![Track::from_segments(vec![points])]);
//! let result = classify(&doc, None, &ClassifierOptions::default());
//! println!("{}", result.kind);
//! ```

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackError};

// Geographic utilities (distance, orientation, midpoint)
pub mod geo_utils;

// Gaussian smoothing of positions and elevations
pub mod smoothing;
pub use smoothing::{smooth_document_positions, smooth_positions};

// Point-repair passes (noise, stops, intersections, speed, segments)
pub mod repair;
pub use repair::{
    correct_speed_outliers, correct_vertical_speed, join_segments, remove_first_noise,
    remove_intersections, remove_intersections_until_stable, remove_noise, remove_stops,
    simplify_points, trim_trailing_speed,
};

// Timestamp repair and time quality
pub mod time;
pub use time::{repair_segment_times, repair_times, time_quality};

// Elevation filling and reference reconciliation
pub mod elevation;
pub use elevation::{
    fill_missing_elevation, flat_elevation_runs, reconcile_with_reference, CachedSource,
    ElevationLookup, ElevationSource, ReconcileReport, RetryingSource,
};

// LRU cache for reference elevation lookups
pub mod lru_cache;

// Quality scoring
pub mod quality;
pub use quality::{score_distance_quality, score_track, QualityReport};

// Activity classification
pub mod classify;
pub use classify::{classify, classify_with_cancel, ActivityKind, Classification, ClassificationStats};

// Duplicate detection across a batch
pub mod duplicates;
pub use duplicates::{DuplicateCandidate, DuplicateDetector, DuplicateKind, DuplicateMatch};

// Document metadata: creator, start/end, geocoding, time zones
pub mod metadata;
pub use metadata::{
    creator_label, end_position, end_time, has_any_time, localize, location_start,
    start_position, start_time, Address, Geocoder, TimezoneLookup,
};

// Option structs and file-backed configuration
pub mod config;
pub use config::{
    ClassifierOptions, DuplicateRules, FillElevationOptions, FirstNoiseOptions,
    IntersectionOptions, JoinOptions, NoiseOptions, Overwrite, ReconcileOptions, RepairConfig,
    SmoothingOptions, SpeedOptions, StopOptions, TrailingSpeedOptions, VerticalSpeedOptions,
};

// Ordered pass execution with cancellation
pub mod pipeline;
pub use pipeline::{CancelToken, PassReport, PassSpec, Pipeline, PipelineReport};

// Batch processing (repair, score, classify, deduplicate)
pub mod batch;
pub use batch::{process_batch, BatchItem, BatchReport, Services, TrackSummary};

// HTTP reference elevation source
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{HttpElevationSource, DEFAULT_BASE_URL};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS sample.
///
/// Elevation and timestamp are optional: `None` means the recorder did not
/// supply a value, which is distinct from a legitimate sea-level elevation.
///
/// # Example
/// ```
/// use track_repair::Point;
/// let point = Point::new(46.5197, 6.6323).with_elevation(372.0);
/// assert!(point.has_position());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
}

impl Point {
    /// Create a point without elevation or time.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
            time: None,
        }
    }

    /// Set a known elevation.
    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    /// Set an elevation from a source that writes `0.0` for "unknown".
    pub fn with_legacy_elevation(mut self, elevation: f64) -> Self {
        self.elevation = if elevation == 0.0 { None } else { Some(elevation) };
        self
    }

    /// Set a timestamp.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Check if the point carries a usable position.
    ///
    /// Coordinates must be finite and in range. Exactly `(0, 0)` is the
    /// recorders' "no fix" marker and is not usable.
    pub fn has_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// Contiguous index span of one segment inside a track's point arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// An ordered sequence of segments.
///
/// All points live in one arena; segments are contiguous spans that cover
/// the arena in order. Merging two neighbouring segments is a boundary edit
/// and never copies points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Track {
    points: Vec<Point>,
    spans: Vec<Span>,
}

impl Track {
    /// Create an empty track.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a track from segment point lists.
    pub fn from_segments(segments: Vec<Vec<Point>>) -> Self {
        let mut track = Self::new();
        for segment in segments {
            track.push_segment(segment);
        }
        track
    }

    /// Append a segment at the end of the track.
    pub fn push_segment(&mut self, points: Vec<Point>) {
        let start = self.points.len();
        self.points.extend(points);
        self.spans.push(Span {
            start,
            end: self.points.len(),
        });
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.spans.len()
    }

    /// Points of segment `index`.
    ///
    /// Panics if the segment does not exist.
    pub fn segment(&self, index: usize) -> &[Point] {
        &self.points[self.spans[index].range()]
    }

    /// Mutable points of segment `index` (length cannot change).
    pub fn segment_mut(&mut self, index: usize) -> &mut [Point] {
        let range = self.spans[index].range();
        &mut self.points[range]
    }

    /// Iterate over segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &[Point]> + '_ {
        self.spans.iter().map(move |s| &self.points[s.range()])
    }

    /// All points of the track in order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Mutable access to all points (lengths cannot change).
    pub fn points_mut(&mut self) -> &mut [Point] {
        &mut self.points
    }

    /// Number of points over all segments.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Replace the points of a segment, shifting later spans.
    pub fn replace_segment(&mut self, index: usize, points: Vec<Point>) {
        let span = self.spans[index];
        let new_len = points.len();
        let _removed: Vec<Point> = self.points.splice(span.range(), points).collect();

        let shift = new_len as isize - span.len() as isize;
        self.spans[index].end = span.start + new_len;
        for later in self.spans.iter_mut().skip(index + 1) {
            later.start = (later.start as isize + shift) as usize;
            later.end = (later.end as isize + shift) as usize;
        }
    }

    /// Keep only the first `len` points of a segment.
    pub fn truncate_segment(&mut self, index: usize, len: usize) {
        let segment_len = self.spans[index].len();
        if len >= segment_len {
            return;
        }
        let kept = self.segment(index)[..len].to_vec();
        self.replace_segment(index, kept);
    }

    /// Remove a segment and its points.
    pub fn remove_segment(&mut self, index: usize) {
        self.replace_segment(index, Vec::new());
        self.spans.remove(index);
    }

    /// Merge segment `index` into its predecessor (boundary edit).
    ///
    /// Returns false when there is no predecessor.
    pub fn merge_into_previous(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.spans.len() {
            return false;
        }
        self.spans[index - 1].end = self.spans[index].end;
        self.spans.remove(index);
        true
    }

    /// Merge segment `index` into its successor (boundary edit).
    ///
    /// Returns false when there is no successor.
    pub fn merge_into_next(&mut self, index: usize) -> bool {
        if index + 1 >= self.spans.len() {
            return false;
        }
        self.spans[index + 1].start = self.spans[index].start;
        self.spans.remove(index);
        true
    }
}

/// A parsed recording: tracks plus the free-text creator label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub creator: String,
    pub tracks: Vec<Track>,
}

impl Document {
    pub fn new(creator: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            creator: creator.into(),
            tracks,
        }
    }

    /// Number of points over all tracks.
    pub fn point_count(&self) -> usize {
        self.tracks.iter().map(Track::point_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.point_count() == 0
    }

    /// Iterate over every point in document order.
    pub fn points(&self) -> impl Iterator<Item = &Point> + '_ {
        self.tracks.iter().flat_map(|t| t.points().iter())
    }

    /// Iterate mutably over every point in document order.
    pub fn points_mut(&mut self) -> impl Iterator<Item = &mut Point> + '_ {
        self.tracks.iter_mut().flat_map(|t| t.points_mut().iter_mut())
    }
}

/// Location of a finding: (track, segment, point) indices.
///
/// Only stable within one pass; later passes may delete or merge points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementReference {
    pub track: usize,
    pub segment: usize,
    pub point: usize,
}

/// Uniform report emitted by every repair pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub location: ElementReference,
    /// Snapshot of the point where the anomaly was detected
    pub point: Point,
    /// Number of points involved (removed, merged or repaired)
    pub count: usize,
    /// Distance in meters
    pub length: f64,
    /// Speed in m/s
    pub speed: f64,
    /// Vertical speed in m/s
    pub vertical_speed: f64,
    /// Elevation delta or replacement value in meters
    pub elevation: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl Finding {
    /// A finding at the given location with zeroed metrics.
    pub fn at(track: usize, segment: usize, point: usize, snapshot: Point) -> Self {
        Self {
            location: ElementReference {
                track,
                segment,
                point,
            },
            point: snapshot,
            ..Default::default()
        }
    }

    /// Copy edge metrics into the finding.
    pub fn with_edge(mut self, edge: geo_utils::Edge) -> Self {
        self.length = edge.length;
        self.speed = edge.speed;
        self.vertical_speed = edge.vertical_speed;
        self.elevation = edge.elevation;
        self.duration = edge.duration;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }
}

/// Bounding box of a document.
///
/// The empty value is the literal `{90, -90, 180, -180}`; a document whose
/// extremes equal it cannot be told apart from one without points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Bounds {
    /// Sentinel for "no points seen".
    pub const EMPTY: Bounds = Bounds {
        min_lat: 90.0,
        max_lat: -90.0,
        min_lon: 180.0,
        max_lon: -180.0,
    };

    /// Bounds of every usable position in the document.
    pub fn of_document(doc: &Document) -> Self {
        doc.points()
            .filter(|p| p.has_position())
            .fold(Self::EMPTY, |mut b, p| {
                b.min_lat = b.min_lat.min(p.latitude);
                b.max_lat = b.max_lat.max(p.latitude);
                b.min_lon = b.min_lon.min(p.longitude);
                b.max_lon = b.max_lon.max(p.longitude);
                b
            })
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Center of the bounds, `None` when empty.
    pub fn center(&self) -> Option<Point> {
        if self.is_empty() {
            return None;
        }
        Some(Point::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        ))
    }

    /// Names of the `degree`-sized grid tiles touched by the bounds.
    ///
    /// Tiles are named by their south-west corner, e.g. `N46E006` for one
    /// degree tiles or `N46.5E006.5` for half degree tiles.
    pub fn tiles(&self, degree: f64) -> Vec<String> {
        if self.is_empty() || degree <= 0.0 {
            return Vec::new();
        }
        let lat_start = (self.min_lat / degree).floor() as i64;
        let lat_end = (self.max_lat / degree).floor() as i64;
        let lon_start = (self.min_lon / degree).floor() as i64;
        let lon_end = (self.max_lon / degree).floor() as i64;

        let mut tiles = Vec::new();
        for lat in lat_start..=lat_end {
            for lon in lon_start..=lon_end {
                tiles.push(tile_name(lat as f64 * degree, lon as f64 * degree, degree));
            }
        }
        tiles
    }
}

fn tile_name(lat: f64, lon: f64, degree: f64) -> String {
    let ns = if lat < 0.0 { 'S' } else { 'N' };
    let ew = if lon < 0.0 { 'W' } else { 'E' };
    if degree.fract() == 0.0 {
        format!("{}{:02}{}{:03}", ns, lat.abs() as i64, ew, lon.abs() as i64)
    } else {
        format!("{}{:04.1}{}{:05.1}", ns, lat.abs(), ew, lon.abs())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, lat0: f64) -> Vec<Point> {
        (0..n)
            .map(|i| Point::new(lat0 + i as f64 * 0.0001, 7.0))
            .collect()
    }

    #[test]
    fn test_point_position_validation() {
        assert!(Point::new(46.5, 6.6).has_position());
        assert!(!Point::new(91.0, 0.0).has_position());
        assert!(!Point::new(0.0, 181.0).has_position());
        assert!(!Point::new(f64::NAN, 0.0).has_position());
        assert!(!Point::new(0.0, 0.0).has_position());
        assert!(Point::new(0.0, 1.0).has_position());
    }

    #[test]
    fn test_legacy_elevation() {
        assert_eq!(Point::new(1.0, 1.0).with_legacy_elevation(0.0).elevation, None);
        assert_eq!(
            Point::new(1.0, 1.0).with_legacy_elevation(12.5).elevation,
            Some(12.5)
        );
    }

    #[test]
    fn test_track_segments() {
        let track = Track::from_segments(vec![line(3, 45.0), line(2, 46.0), line(4, 47.0)]);
        assert_eq!(track.segment_count(), 3);
        assert_eq!(track.point_count(), 9);
        assert_eq!(track.segment(1).len(), 2);
        assert_eq!(track.segment(2)[0].latitude, 47.0);
        let lens: Vec<usize> = track.segments().map(|s| s.len()).collect();
        assert_eq!(lens, vec![3, 2, 4]);
    }

    #[test]
    fn test_replace_segment_shifts_later_spans() {
        let mut track = Track::from_segments(vec![line(3, 45.0), line(2, 46.0), line(4, 47.0)]);
        track.replace_segment(0, line(1, 44.0));
        assert_eq!(track.point_count(), 7);
        assert_eq!(track.segment(0).len(), 1);
        assert_eq!(track.segment(1)[0].latitude, 46.0);
        assert_eq!(track.segment(2)[0].latitude, 47.0);

        track.replace_segment(1, line(5, 48.0));
        assert_eq!(track.segment(1).len(), 5);
        assert_eq!(track.segment(2).len(), 4);
        assert_eq!(track.segment(2)[0].latitude, 47.0);
    }

    #[test]
    fn test_truncate_and_remove_segment() {
        let mut track = Track::from_segments(vec![line(3, 45.0), line(4, 46.0)]);
        track.truncate_segment(1, 2);
        assert_eq!(track.segment(1).len(), 2);
        track.truncate_segment(1, 10);
        assert_eq!(track.segment(1).len(), 2);
        track.remove_segment(0);
        assert_eq!(track.segment_count(), 1);
        assert_eq!(track.point_count(), 2);
        assert_eq!(track.segment(0)[0].latitude, 46.0);
    }

    #[test]
    fn test_merge_segments() {
        let mut track = Track::from_segments(vec![line(3, 45.0), line(2, 46.0), line(4, 47.0)]);
        assert!(track.merge_into_previous(1));
        assert_eq!(track.segment_count(), 2);
        assert_eq!(track.segment(0).len(), 5);
        assert!(track.merge_into_next(0));
        assert_eq!(track.segment_count(), 1);
        assert_eq!(track.segment(0).len(), 9);
        assert!(!track.merge_into_previous(0));
        assert!(!track.merge_into_next(0));
    }

    #[test]
    fn test_bounds() {
        let doc = Document::new("", vec![Track::from_segments(vec![line(11, 45.0)])]);
        let bounds = Bounds::of_document(&doc);
        assert_eq!(bounds.min_lat, 45.0);
        assert!((bounds.max_lat - 45.001).abs() < 1e-9);
        assert!(!bounds.is_empty());
        assert!(bounds.center().is_some());

        let empty = Bounds::of_document(&Document::default());
        assert!(empty.is_empty());
        assert!(empty.center().is_none());
        assert!(empty.tiles(1.0).is_empty());
    }

    #[test]
    fn test_tiles() {
        let bounds = Bounds {
            min_lat: 46.2,
            max_lat: 46.7,
            min_lon: 6.1,
            max_lon: 6.3,
        };
        assert_eq!(bounds.tiles(1.0), vec!["N46E006".to_string()]);
        assert_eq!(
            bounds.tiles(0.5),
            vec!["N46.0E006.0".to_string(), "N46.5E006.0".to_string()]
        );

        let west = Bounds {
            min_lat: -33.9,
            max_lat: -33.8,
            min_lon: -70.7,
            max_lon: -70.6,
        };
        assert_eq!(west.tiles(1.0), vec!["S34W071".to_string()]);
    }
}
