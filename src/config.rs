//! Parameter structs for every pass and the file-backed [`RepairConfig`].
//!
//! Each struct carries the canonical defaults. `RepairConfig` aggregates
//! them, loads from JSON with missing fields falling back to defaults, and
//! validates everything before any track is touched.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ensure_non_negative, Result, TrackError};
use crate::pipeline::{PassSpec, Pipeline};

// ============================================================================
// Point-repair pass options
// ============================================================================

/// Options for the leading-noise pass that removes GPS settling at the
/// start of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirstNoiseOptions {
    /// Number of leading points examined.
    /// Default: 11
    pub leading_points: usize,

    /// Lookahead window for a closer point.
    /// Default: 5
    pub window: usize,

    /// Maximum distance (meters) to the closer point.
    /// Default: 8.0
    pub max_distance: f64,

    /// Maximum elevation (meters) of the closer point.
    /// Default: 0.0
    pub max_elevation: f64,

    /// Segments shorter than this are left alone.
    /// Default: 80
    pub min_segment_len: usize,
}

impl Default for FirstNoiseOptions {
    fn default() -> Self {
        Self {
            leading_points: 11,
            window: 5,
            max_distance: 8.0,
            max_elevation: 0.0,
            min_segment_len: 80,
        }
    }
}

/// Options for general noise removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseOptions {
    /// Maximum distance (meters) to the closer point.
    /// Default: 6.0
    pub max_distance: f64,

    /// Maximum elevation (meters) of the closer point.
    /// Default: 1.1
    pub max_elevation: f64,

    /// Lookahead window.
    /// Default: 4
    pub window: usize,
}

impl Default for NoiseOptions {
    fn default() -> Self {
        Self {
            max_distance: 6.0,
            max_elevation: 1.1,
            window: 4,
        }
    }
}

/// Options for stop and near-duplicate removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopOptions {
    /// Maximum distance (meters) from the run's anchor point.
    /// Default: 5.0
    pub max_distance: f64,

    /// Minimum duration (seconds) for a run to count as a stop.
    /// Default: 90.0
    pub min_seconds: f64,

    /// Maximum elevation change (meters) from the anchor point.
    /// Default: 0.5
    pub max_elevation: f64,

    /// A run must have more following points than this.
    /// Default: 3
    pub min_points: usize,

    /// Keep the run's last point to mark the boundary.
    /// Default: true
    pub keep_boundary: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            max_distance: 5.0,
            min_seconds: 90.0,
            max_elevation: 0.5,
            min_points: 3,
            keep_boundary: true,
        }
    }
}

impl StopOptions {
    /// Degenerate stop options that simplify by distance alone.
    pub fn simplify(max_distance: f64) -> Self {
        Self {
            max_distance,
            min_seconds: 0.0,
            max_elevation: f64::INFINITY,
            min_points: 0,
            keep_boundary: false,
        }
    }
}

/// Options for self-intersection removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectionOptions {
    /// How many edges ahead to look for a crossing.
    /// Default: 6
    pub lookahead: usize,

    /// Cap on repeated runs when iterating to a fixed point.
    /// Default: 4
    pub max_iterations: usize,
}

impl Default for IntersectionOptions {
    fn default() -> Self {
        Self {
            lookahead: 6,
            max_iterations: 4,
        }
    }
}

/// Options for speed-outlier correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedOptions {
    /// Maximum plausible 2-D speed (m/s).
    /// Default: 200.0
    pub max_speed: f64,

    /// How many points ahead to search for the healing partner.
    /// Default: 4
    pub lookahead: usize,
}

impl Default for SpeedOptions {
    fn default() -> Self {
        Self {
            max_speed: 200.0,
            lookahead: 4,
        }
    }
}

/// Options for trimming a fast tail (recording left running in a vehicle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingSpeedOptions {
    /// Speed (m/s) above which an edge counts as fast.
    /// Default: 14.0
    pub max_speed: f64,

    /// Seconds of slow movement that end the backward scan.
    /// Default: 120.0
    pub sustained_seconds: f64,

    /// Edges shorter than this (seconds) are ignored.
    /// Default: 2.5
    pub min_edge_seconds: f64,

    /// Segments shorter than this are left alone.
    /// Default: 80
    pub min_segment_len: usize,
}

impl Default for TrailingSpeedOptions {
    fn default() -> Self {
        Self {
            max_speed: 14.0,
            sustained_seconds: 120.0,
            min_edge_seconds: 2.5,
            min_segment_len: 80,
        }
    }
}

/// Options for vertical-speed correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerticalSpeedOptions {
    /// Maximum plausible vertical speed (m/s).
    /// Default: 1.5
    pub max_vertical_speed: f64,

    /// Points before the anomaly included in the smoothing range.
    /// Default: 2
    pub before: usize,

    /// Points after the anomaly included in the smoothing range (exclusive).
    /// Default: 5
    pub after: usize,

    /// Smoothing window.
    /// Default: 3
    pub window: usize,

    /// Smoothing sigma.
    /// Default: 1.5
    pub sigma: f64,
}

impl Default for VerticalSpeedOptions {
    fn default() -> Self {
        Self {
            max_vertical_speed: 1.5,
            before: 2,
            after: 5,
            window: 3,
            sigma: 1.5,
        }
    }
}

/// Options for merging short segments into a neighbour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    /// Segments with fewer points are merged.
    /// Default: 14
    pub min_points: usize,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self { min_points: 14 }
    }
}

/// Options for filling missing elevations from neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillElevationOptions {
    /// Search window in each direction.
    /// Default: 10
    pub window: usize,
}

impl Default for FillElevationOptions {
    fn default() -> Self {
        Self { window: 10 }
    }
}

/// Options for gaussian position smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingOptions {
    /// Neighbours on each side.
    /// Default: 1
    pub window: usize,

    /// Kernel sigma.
    /// Default: 1.1
    pub sigma: f64,
}

impl Default for SmoothingOptions {
    fn default() -> Self {
        Self {
            window: 1,
            sigma: 1.1,
        }
    }
}

/// Which device elevations reconciliation replaces with reference values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overwrite {
    /// Report only
    #[default]
    Never,
    /// Replace points that violate their band tolerance
    Violations,
    /// Replace every sampled point
    All,
}

/// Options for reconciling device elevation with a reference source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileOptions {
    /// Default: Never
    pub overwrite: Overwrite,
}

// ============================================================================
// Classifier and duplicate options
// ============================================================================

/// Options for activity classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierOptions {
    /// Segments shorter than this are not analysed.
    /// Default: 80
    pub min_segment_len: usize,

    /// Fraction trimmed from each end is 1/trim_divisor.
    /// Default: 10
    pub trim_divisor: usize,

    /// Speed-outlier threshold for the working copy (m/s).
    /// Default: 200.0
    pub max_speed: f64,

    /// Coarse simplification distance (meters).
    /// Default: 1.2
    pub simplify_distance: f64,

    /// Strict stop removal.
    /// Default: 9 m, 30 s, 8 m, 12 points, keep boundary
    pub stops: StopOptions,

    /// Self-intersection removal, run to a fixed point.
    /// Default: lookahead 7, 4 iterations
    pub intersections: IntersectionOptions,

    /// Below this reference accuracy (%) elevations are overwritten.
    /// Default: 60.0
    pub accuracy_threshold: f64,

    /// Vertical speed (m/s) separating flat from climbing/descending.
    /// Default: 0.4
    pub flat_vertical_speed: f64,

    /// Elevation-change to distance ratio below which a track is flat.
    /// Default: 0.05
    pub flat_ratio: f64,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            min_segment_len: 80,
            trim_divisor: 10,
            max_speed: 200.0,
            simplify_distance: 1.2,
            stops: StopOptions {
                max_distance: 9.0,
                min_seconds: 30.0,
                max_elevation: 8.0,
                min_points: 12,
                keep_boundary: true,
            },
            intersections: IntersectionOptions {
                lookahead: 7,
                max_iterations: 4,
            },
            accuracy_threshold: 60.0,
            flat_vertical_speed: 0.4,
            flat_ratio: 0.05,
        }
    }
}

/// Tolerances for duplicate detection. A zero tolerance disables its rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateRules {
    /// Start time tolerance (seconds).
    /// Default: 0 (disabled)
    pub start_seconds: f64,

    /// End time tolerance (seconds).
    /// Default: 0 (disabled)
    pub end_seconds: f64,

    /// Start position tolerance (meters).
    /// Default: 0 (disabled)
    pub start_meters: f64,

    /// End position tolerance (meters).
    /// Default: 0 (disabled)
    pub end_meters: f64,

    /// Report a start-time match whose end times also match as a
    /// start+end match; otherwise it stays a start-time match.
    /// Default: false
    pub require_end_time: bool,

    /// Report a start-position match whose end positions also match as a
    /// start+end match; otherwise it stays a start-position match.
    /// Default: false
    pub require_end_position: bool,

    /// Remove confirmed duplicates with identical creator and quality.
    /// Default: false
    pub remove_duplicates: bool,
}

impl DuplicateRules {
    pub fn time_enabled(&self) -> bool {
        self.start_seconds > 0.0 || self.end_seconds > 0.0
    }

    pub fn position_enabled(&self) -> bool {
        self.start_meters > 0.0 || self.end_meters > 0.0
    }

    /// Reject negative tolerances and an all-zero rule set.
    pub fn validate(&self) -> Result<()> {
        ensure_non_negative("start_seconds", self.start_seconds)?;
        ensure_non_negative("end_seconds", self.end_seconds)?;
        ensure_non_negative("start_meters", self.start_meters)?;
        ensure_non_negative("end_meters", self.end_meters)?;
        if !self.time_enabled() && !self.position_enabled() {
            return Err(TrackError::NoRuleEnabled);
        }
        Ok(())
    }
}

// ============================================================================
// Aggregate configuration
// ============================================================================

/// Complete engine configuration, loadable from JSON.
///
/// # Example
/// ```
/// use track_repair::RepairConfig;
///
/// let config = RepairConfig::from_json_str(r#"{ "noise": { "max_distance": 4.0 } }"#).unwrap();
/// assert_eq!(config.noise.max_distance, 4.0);
/// assert_eq!(config.noise.window, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub first_noise: FirstNoiseOptions,
    pub noise: NoiseOptions,
    pub stops: StopOptions,
    /// Distance (meters) for plain point simplification.
    /// Default: 0.5
    pub simplify_distance: f64,
    pub intersections: IntersectionOptions,
    pub speed: SpeedOptions,
    pub trailing_speed: TrailingSpeedOptions,
    pub vertical_speed: VerticalSpeedOptions,
    pub join: JoinOptions,
    pub fill_elevation: FillElevationOptions,
    pub smoothing: SmoothingOptions,
    pub reconcile: ReconcileOptions,
    pub classifier: ClassifierOptions,
    /// Duplicate detection rules; `None` disables detection.
    pub duplicates: Option<DuplicateRules>,
    /// Passes to run, in order. Empty means [`Pipeline::standard`].
    pub passes: Vec<PassSpec>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            first_noise: FirstNoiseOptions::default(),
            noise: NoiseOptions::default(),
            stops: StopOptions::default(),
            simplify_distance: 0.5,
            intersections: IntersectionOptions::default(),
            speed: SpeedOptions::default(),
            trailing_speed: TrailingSpeedOptions::default(),
            vertical_speed: VerticalSpeedOptions::default(),
            join: JoinOptions::default(),
            fill_elevation: FillElevationOptions::default(),
            smoothing: SmoothingOptions::default(),
            reconcile: ReconcileOptions::default(),
            classifier: ClassifierOptions::default(),
            duplicates: None,
            passes: Vec::new(),
        }
    }
}

impl RepairConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RepairConfig =
            serde_json::from_str(json).map_err(|e| TrackError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| TrackError::ConfigFile {
            path: display.clone(),
            message: e.to_string(),
        })?;
        let config: RepairConfig =
            serde_json::from_str(&content).map_err(|e| TrackError::ConfigFile {
                path: display.clone(),
                message: e.to_string(),
            })?;
        config.validate()?;
        log::info!("[RepairConfig] Loaded {}", display);
        Ok(config)
    }

    /// The configured pipeline, or the standard one when none is listed.
    pub fn pipeline(&self) -> Pipeline {
        if self.passes.is_empty() {
            Pipeline::standard(self)
        } else {
            Pipeline::new(self.passes.clone())
        }
    }

    /// Reject unusable values before any track is processed.
    pub fn validate(&self) -> Result<()> {
        validate_first_noise(&self.first_noise)?;
        validate_noise(&self.noise)?;
        validate_stops(&self.stops)?;
        ensure_non_negative("simplify_distance", self.simplify_distance)?;
        validate_intersections(&self.intersections)?;
        validate_speed(&self.speed)?;
        validate_trailing_speed(&self.trailing_speed)?;
        validate_vertical_speed(&self.vertical_speed)?;
        validate_smoothing(&self.smoothing)?;
        validate_classifier(&self.classifier)?;
        if let Some(rules) = &self.duplicates {
            rules.validate()?;
        }
        for pass in &self.passes {
            pass.validate()?;
        }
        Ok(())
    }
}

pub(crate) fn validate_first_noise(o: &FirstNoiseOptions) -> Result<()> {
    ensure_non_negative("first_noise.max_distance", o.max_distance)?;
    ensure_non_negative("first_noise.max_elevation", o.max_elevation)
}

pub(crate) fn validate_noise(o: &NoiseOptions) -> Result<()> {
    ensure_non_negative("noise.max_distance", o.max_distance)?;
    ensure_non_negative("noise.max_elevation", o.max_elevation)
}

pub(crate) fn validate_stops(o: &StopOptions) -> Result<()> {
    ensure_non_negative("stops.max_distance", o.max_distance)?;
    ensure_non_negative("stops.min_seconds", o.min_seconds)?;
    ensure_non_negative("stops.max_elevation", o.max_elevation)
}

pub(crate) fn validate_intersections(o: &IntersectionOptions) -> Result<()> {
    if o.lookahead == 0 {
        return Err(TrackError::config("intersections.lookahead must be at least 1"));
    }
    Ok(())
}

pub(crate) fn validate_speed(o: &SpeedOptions) -> Result<()> {
    ensure_non_negative("speed.max_speed", o.max_speed)
}

pub(crate) fn validate_trailing_speed(o: &TrailingSpeedOptions) -> Result<()> {
    ensure_non_negative("trailing_speed.max_speed", o.max_speed)?;
    ensure_non_negative("trailing_speed.sustained_seconds", o.sustained_seconds)?;
    ensure_non_negative("trailing_speed.min_edge_seconds", o.min_edge_seconds)
}

pub(crate) fn validate_vertical_speed(o: &VerticalSpeedOptions) -> Result<()> {
    ensure_non_negative("vertical_speed.max_vertical_speed", o.max_vertical_speed)?;
    if !(o.sigma > 0.0) {
        return Err(TrackError::config("vertical_speed.sigma must be positive"));
    }
    Ok(())
}

pub(crate) fn validate_smoothing(o: &SmoothingOptions) -> Result<()> {
    if !(o.sigma > 0.0) {
        return Err(TrackError::config("smoothing.sigma must be positive"));
    }
    Ok(())
}

fn validate_classifier(o: &ClassifierOptions) -> Result<()> {
    ensure_non_negative("classifier.max_speed", o.max_speed)?;
    ensure_non_negative("classifier.simplify_distance", o.simplify_distance)?;
    validate_stops(&o.stops)?;
    validate_intersections(&o.intersections)?;
    ensure_non_negative("classifier.accuracy_threshold", o.accuracy_threshold)?;
    if o.trim_divisor == 0 {
        return Err(TrackError::config("classifier.trim_divisor must be at least 1"));
    }
    Ok(())
}
