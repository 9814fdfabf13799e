//! # Pass Pipeline
//!
//! An ordered list of passes run against one document, with cooperative
//! cancellation between passes.
//!
//! Passes are data ([`PassSpec`]) so a pipeline can be loaded from a
//! configuration file:
//!
//! ```json
//! { "passes": [
//!     { "pass": "repair_times" },
//!     { "pass": "noise", "max_distance": 4.0 },
//!     { "pass": "simplify", "max_distance": 0.5 }
//! ] }
//! ```
//!
//! Each pass commits its rewrites only after computing them, so a
//! cancelled run leaves the document as it was after the last completed
//! pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{
    validate_first_noise, validate_intersections, validate_noise, validate_smoothing,
    validate_speed, validate_stops, validate_trailing_speed, validate_vertical_speed,
    FillElevationOptions, FirstNoiseOptions, IntersectionOptions, JoinOptions, NoiseOptions,
    Overwrite, ReconcileOptions, RepairConfig, SmoothingOptions, SpeedOptions, StopOptions,
    TrailingSpeedOptions, VerticalSpeedOptions,
};
use crate::elevation::{
    fill_missing_elevation, flat_elevation_runs, reconcile_with_reference, ElevationSource,
};
use crate::error::{ensure_non_negative, Result, TrackError};
use crate::repair::{
    correct_speed_outliers, correct_vertical_speed, join_segments, remove_first_noise,
    remove_intersections, remove_intersections_until_stable, remove_noise, remove_stops,
    simplify_points, trim_trailing_speed,
};
use crate::smoothing::smooth_document_positions;
use crate::time::repair_times;
use crate::{Document, Finding};

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cancellation flag with an optional deadline.
///
/// Clones share the flag, so one clone can cancel work running on another
/// thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also counts as cancelled once `deadline` has passed.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    /// A token that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

// ============================================================================
// Pass specifications
// ============================================================================

/// One pass and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pass", rename_all = "snake_case")]
pub enum PassSpec {
    RepairTimes,
    FirstNoise(FirstNoiseOptions),
    Noise(NoiseOptions),
    Stops(StopOptions),
    Simplify { max_distance: f64 },
    Intersections(IntersectionOptions),
    /// Intersection removal repeated until nothing is found
    IntersectionsUntilStable(IntersectionOptions),
    SpeedOutliers(SpeedOptions),
    TrailingSpeed(TrailingSpeedOptions),
    VerticalSpeed(VerticalSpeedOptions),
    JoinSegments(JoinOptions),
    FillElevation(FillElevationOptions),
    FlatElevation { min_run: usize },
    SmoothPositions(SmoothingOptions),
    /// Skipped when no reference source is available
    Reconcile(ReconcileOptions),
}

impl PassSpec {
    pub fn name(&self) -> &'static str {
        match self {
            PassSpec::RepairTimes => "repair_times",
            PassSpec::FirstNoise(_) => "first_noise",
            PassSpec::Noise(_) => "noise",
            PassSpec::Stops(_) => "stops",
            PassSpec::Simplify { .. } => "simplify",
            PassSpec::Intersections(_) => "intersections",
            PassSpec::IntersectionsUntilStable(_) => "intersections_until_stable",
            PassSpec::SpeedOutliers(_) => "speed_outliers",
            PassSpec::TrailingSpeed(_) => "trailing_speed",
            PassSpec::VerticalSpeed(_) => "vertical_speed",
            PassSpec::JoinSegments(_) => "join_segments",
            PassSpec::FillElevation(_) => "fill_elevation",
            PassSpec::FlatElevation { .. } => "flat_elevation",
            PassSpec::SmoothPositions(_) => "smooth_positions",
            PassSpec::Reconcile(_) => "reconcile",
        }
    }

    /// Reject unusable parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            PassSpec::FirstNoise(o) => validate_first_noise(o),
            PassSpec::Noise(o) => validate_noise(o),
            PassSpec::Stops(o) => validate_stops(o),
            PassSpec::Simplify { max_distance } => {
                ensure_non_negative("simplify.max_distance", *max_distance)
            }
            PassSpec::Intersections(o) | PassSpec::IntersectionsUntilStable(o) => {
                validate_intersections(o)
            }
            PassSpec::SpeedOutliers(o) => validate_speed(o),
            PassSpec::TrailingSpeed(o) => validate_trailing_speed(o),
            PassSpec::VerticalSpeed(o) => validate_vertical_speed(o),
            PassSpec::SmoothPositions(o) => validate_smoothing(o),
            PassSpec::RepairTimes
            | PassSpec::JoinSegments(_)
            | PassSpec::FillElevation(_)
            | PassSpec::FlatElevation { .. }
            | PassSpec::Reconcile(_) => Ok(()),
        }
    }

    /// Run the pass. Returns its findings and the number of changes it
    /// reports (findings, or corrections for passes without findings).
    fn run(
        &self,
        doc: &mut Document,
        fix: bool,
        source: Option<&dyn ElevationSource>,
    ) -> (Vec<Finding>, usize) {
        let findings = match self {
            PassSpec::RepairTimes => return (Vec::new(), repair_times(doc, fix)),
            PassSpec::SmoothPositions(o) => {
                let moved = if fix { smooth_document_positions(doc, o) } else { 0 };
                return (Vec::new(), moved);
            }
            PassSpec::FirstNoise(o) => remove_first_noise(doc, o, fix),
            PassSpec::Noise(o) => remove_noise(doc, o, fix),
            PassSpec::Stops(o) => remove_stops(doc, o, fix),
            PassSpec::Simplify { max_distance } => simplify_points(doc, *max_distance, fix),
            PassSpec::Intersections(o) => remove_intersections(doc, o, fix),
            PassSpec::IntersectionsUntilStable(o) => {
                if fix {
                    remove_intersections_until_stable(doc, o).0
                } else {
                    remove_intersections(doc, o, false)
                }
            }
            PassSpec::SpeedOutliers(o) => correct_speed_outliers(doc, o, fix),
            PassSpec::TrailingSpeed(o) => trim_trailing_speed(doc, o, fix),
            PassSpec::VerticalSpeed(o) => correct_vertical_speed(doc, o, fix),
            PassSpec::JoinSegments(o) => join_segments(doc, o, fix),
            PassSpec::FillElevation(o) => fill_missing_elevation(doc, o, fix),
            PassSpec::FlatElevation { min_run } => flat_elevation_runs(doc, *min_run, source, fix),
            PassSpec::Reconcile(o) => {
                let Some(source) = source else {
                    debug!("[Pipeline] No elevation source, reconcile skipped");
                    return (Vec::new(), 0);
                };
                let options = if fix {
                    o.clone()
                } else {
                    ReconcileOptions {
                        overwrite: Overwrite::Never,
                    }
                };
                match reconcile_with_reference(doc, source, &options) {
                    Ok(report) => report.findings,
                    Err(e) => {
                        warn!("[Pipeline] Reconcile skipped: {}", e);
                        Vec::new()
                    }
                }
            }
        };
        let count = findings.len();
        (findings, count)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Findings of one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub name: String,
    pub findings: Vec<Finding>,
    /// Findings, or corrections for passes that report none
    pub count: usize,
}

/// Findings of a whole pipeline run, in pass order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub passes: Vec<PassReport>,
}

impl PipelineReport {
    pub fn total(&self) -> usize {
        self.passes.iter().map(|p| p.count).sum()
    }

    pub fn pass(&self, name: &str) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.name == name)
    }
}

/// An ordered list of passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    passes: Vec<PassSpec>,
}

impl Pipeline {
    pub fn new(passes: Vec<PassSpec>) -> Self {
        Self { passes }
    }

    /// The default cleaning order using the configured parameters.
    pub fn standard(config: &RepairConfig) -> Self {
        Self::new(vec![
            PassSpec::RepairTimes,
            PassSpec::FirstNoise(config.first_noise.clone()),
            PassSpec::Noise(config.noise.clone()),
            PassSpec::SpeedOutliers(config.speed.clone()),
            PassSpec::Stops(config.stops.clone()),
            PassSpec::Simplify {
                max_distance: config.simplify_distance,
            },
            PassSpec::IntersectionsUntilStable(config.intersections.clone()),
            PassSpec::TrailingSpeed(config.trailing_speed.clone()),
            PassSpec::JoinSegments(config.join.clone()),
            PassSpec::FillElevation(config.fill_elevation.clone()),
            PassSpec::VerticalSpeed(config.vertical_speed.clone()),
            PassSpec::Reconcile(config.reconcile.clone()),
        ])
    }

    pub fn passes(&self) -> &[PassSpec] {
        &self.passes
    }

    /// Run every pass in order.
    ///
    /// Cancellation is checked before each pass; a cancelled run returns
    /// [`TrackError::Cancelled`] with the number of passes that completed.
    pub fn run(
        &self,
        doc: &mut Document,
        fix: bool,
        source: Option<&dyn ElevationSource>,
        cancel: &CancelToken,
    ) -> Result<PipelineReport> {
        let start = Instant::now();
        let mut report = PipelineReport::default();

        for (completed, pass) in self.passes.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("[Pipeline] Cancelled after {} passes", completed);
                return Err(TrackError::Cancelled {
                    completed_passes: completed,
                });
            }
            let (findings, count) = pass.run(doc, fix, source);
            debug!("[Pipeline] {}: {}", pass.name(), count);
            report.passes.push(PassReport {
                name: pass.name().to_string(),
                findings,
                count,
            });
        }

        info!(
            "[Pipeline] {} passes, {} changes in {:?} (fix: {})",
            self.passes.len(),
            report.total(),
            start.elapsed(),
            fix
        );
        Ok(report)
    }
}
