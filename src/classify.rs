//! # Activity Classification
//!
//! Labels a recording (walking, running, cycling, motor sport; flat or
//! mountain) from its speed and vertical-speed profile.
//!
//! ## Algorithm
//! 1. Clean a private copy: time repair, speed outliers, simplification,
//!    stop removal, intersection removal to a fixed point and, when the
//!    reference disagrees with the device, an elevation overwrite
//! 2. Measure the middle of every long enough segment, dropping a tenth at
//!    each end where starts and stops distort speed
//! 3. Split edges into flat, climbing and descending by vertical speed
//! 4. Flat tracks climb a speed ladder; hilly tracks use mountain labels

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{ClassifierOptions, Overwrite, ReconcileOptions, SpeedOptions};
use crate::elevation::{reconcile_with_reference, ElevationSource};
use crate::error::{Result, TrackError};
use crate::geo_utils::Edge;
use crate::pipeline::CancelToken;
use crate::repair::{
    correct_speed_outliers, remove_intersections_until_stable, remove_stops, simplify_points,
};
use crate::time::repair_times;
use crate::Document;

/// Tolerance on ladder thresholds so that an exact speed reaches its rung.
const THRESHOLD_EPSILON: f64 = 1e-6;

/// Flat-track ladder: minimum flat speed (m/s) for each label, ascending.
const FLAT_LADDER: [(f64, ActivityKind); 5] = [
    (1.6, ActivityKind::RunningSport),
    (4.1, ActivityKind::CyclingTransport),
    (7.5, ActivityKind::CyclingSport),
    (11.0, ActivityKind::CyclingRacing),
    (25.0, ActivityKind::MotorSport),
];

const RUNNING_MOUNTAIN_FLAT: f64 = 1.2;
const RUNNING_MOUNTAIN_TOTAL: f64 = 1.3;
const CYCLING_MOUNTAIN_FLAT: f64 = 3.8;
const CYCLING_MOUNTAIN_TOTAL: f64 = 3.8;

/// Activity label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    #[default]
    Unknown,
    WalkingTransport,
    RunningSport,
    CyclingTransport,
    CyclingSport,
    CyclingRacing,
    MotorSport,
    WalkingMountain,
    RunningMountain,
    CyclingMountain,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActivityKind::Unknown => "Unknown",
            ActivityKind::WalkingTransport => "Walking Transport",
            ActivityKind::RunningSport => "Running Sport",
            ActivityKind::CyclingTransport => "Cycling Transport",
            ActivityKind::CyclingSport => "Cycling Sport",
            ActivityKind::CyclingRacing => "Cycling Racing",
            ActivityKind::MotorSport => "Motor Sport",
            ActivityKind::WalkingMountain => "Walking Mountain",
            ActivityKind::RunningMountain => "Running Mountain",
            ActivityKind::CyclingMountain => "Cycling Mountain",
        };
        f.write_str(label)
    }
}

/// Inputs the decision was based on.
///
/// Every speed is a sum over its edge class divided by the total number of
/// analysed edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationStats {
    /// Analysed edges
    pub edges: usize,
    /// Analysed distance in meters
    pub distance: f64,
    /// Sum of absolute elevation changes in meters
    pub elevation_change: f64,
    /// Elevation change per meter of distance
    pub elevation_ratio: f64,
    pub average_speed: f64,
    /// Edges with |vertical speed| at or below the flat limit
    pub flat_speed: f64,
    pub climbing_speed: f64,
    pub descending_speed: f64,
}

/// Label plus the statistics behind it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ActivityKind,
    pub stats: ClassificationStats,
}

/// Classify a document. The document itself is never modified.
///
/// # Example
/// ```
/// use track_repair::{classify, ActivityKind, ClassifierOptions, Document};
///
/// let result = classify(&Document::default(), None, &ClassifierOptions::default());
/// assert_eq!(result.kind, ActivityKind::Unknown);
/// ```
pub fn classify(
    doc: &Document,
    source: Option<&dyn ElevationSource>,
    options: &ClassifierOptions,
) -> Classification {
    // a token nobody holds cannot be cancelled
    classify_with_cancel(doc, source, options, &CancelToken::new()).unwrap_or_default()
}

/// Classify a document, stopping between cleaning passes when `cancel`
/// fires.
pub fn classify_with_cancel(
    doc: &Document,
    source: Option<&dyn ElevationSource>,
    options: &ClassifierOptions,
    cancel: &CancelToken,
) -> Result<Classification> {
    let mut copy = doc.clone();
    prepare(&mut copy, source, options, cancel)?;
    let stats = measure(&copy, options);
    let kind = decide(&stats, options);
    debug!(
        "[Classify] {} from {} edges: flat {:.2} m/s, total {:.2} m/s, ratio {:.3}",
        kind, stats.edges, stats.flat_speed, stats.average_speed, stats.elevation_ratio
    );
    Ok(Classification { kind, stats })
}

/// Cleaning passes run before measuring.
fn prepare(
    doc: &mut Document,
    source: Option<&dyn ElevationSource>,
    options: &ClassifierOptions,
    cancel: &CancelToken,
) -> Result<()> {
    let checkpoint = |completed_passes: usize| {
        if cancel.is_cancelled() {
            Err(TrackError::Cancelled { completed_passes })
        } else {
            Ok(())
        }
    };

    checkpoint(0)?;
    repair_times(doc, true);
    checkpoint(1)?;
    let speed = SpeedOptions {
        max_speed: options.max_speed,
        ..SpeedOptions::default()
    };
    correct_speed_outliers(doc, &speed, true);
    checkpoint(2)?;
    simplify_points(doc, options.simplify_distance, true);
    checkpoint(3)?;
    remove_stops(doc, &options.stops, true);
    checkpoint(4)?;
    remove_intersections_until_stable(doc, &options.intersections);
    checkpoint(5)?;

    if let Some(source) = source {
        overwrite_if_inaccurate(doc, source, options);
        checkpoint(6)?;
    }
    Ok(())
}

fn overwrite_if_inaccurate(
    doc: &mut Document,
    source: &dyn ElevationSource,
    options: &ClassifierOptions,
) {
    let accuracy = match reconcile_with_reference(doc, source, &ReconcileOptions::default()) {
        Ok(report) => report.accuracy,
        Err(e) => {
            warn!("[Classify] Keeping device elevation: {}", e);
            return;
        }
    };
    if accuracy >= options.accuracy_threshold {
        return;
    }
    debug!(
        "[Classify] Elevation accuracy {:.1}% below {:.1}%, overwriting",
        accuracy, options.accuracy_threshold
    );
    let overwrite = ReconcileOptions {
        overwrite: Overwrite::All,
    };
    if let Err(e) = reconcile_with_reference(doc, source, &overwrite) {
        warn!("[Classify] Elevation overwrite failed: {}", e);
    }
}

/// Accumulate edge statistics over the middle of every long segment.
fn measure(doc: &Document, options: &ClassifierOptions) -> ClassificationStats {
    let mut stats = ClassificationStats::default();
    let mut total_speed = 0.0;
    let mut flat_speed = 0.0;
    let mut climbing_speed = 0.0;
    let mut descending_speed = 0.0;

    for segment in doc.tracks.iter().flat_map(|t| t.segments()) {
        let n = segment.len();
        if n < options.min_segment_len || n < 2 {
            continue;
        }
        let trim = n / options.trim_divisor.max(1);
        let end = (n - trim).min(n - 1);

        for i in trim..end {
            let edge = Edge::between(&segment[i], &segment[i + 1], false);
            if edge.duration <= 0.0 {
                continue;
            }
            stats.edges += 1;
            stats.distance += edge.length;
            stats.elevation_change += edge.elevation.abs();
            total_speed += edge.speed;

            let vertical = edge.vertical_speed;
            if vertical.abs() <= options.flat_vertical_speed {
                flat_speed += edge.speed;
            } else if vertical > 0.0 {
                climbing_speed += edge.speed;
            } else {
                descending_speed += edge.speed;
            }
        }
    }

    if stats.edges > 0 {
        let edges = stats.edges as f64;
        stats.average_speed = total_speed / edges;
        stats.flat_speed = flat_speed / edges;
        stats.climbing_speed = climbing_speed / edges;
        stats.descending_speed = descending_speed / edges;
    }
    if stats.distance > 0.0 {
        stats.elevation_ratio = stats.elevation_change / stats.distance;
    }
    stats
}

fn decide(stats: &ClassificationStats, options: &ClassifierOptions) -> ActivityKind {
    if stats.edges == 0 {
        return ActivityKind::Unknown;
    }

    if stats.elevation_ratio < options.flat_ratio {
        return FLAT_LADDER
            .iter()
            .rev()
            .find(|(threshold, _)| stats.flat_speed >= threshold - THRESHOLD_EPSILON)
            .map_or(ActivityKind::WalkingTransport, |(_, kind)| *kind);
    }

    if stats.flat_speed > CYCLING_MOUNTAIN_FLAT || stats.average_speed > CYCLING_MOUNTAIN_TOTAL {
        ActivityKind::CyclingMountain
    } else if stats.flat_speed > RUNNING_MOUNTAIN_FLAT
        || stats.average_speed > RUNNING_MOUNTAIN_TOTAL
    {
        ActivityKind::RunningMountain
    } else {
        ActivityKind::WalkingMountain
    }
}
