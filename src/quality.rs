//! # Quality Scoring
//!
//! A 0-100 quality score combining three parts:
//! - **Time** (10%) - timestamp consistency, see [`time_quality`]
//! - **Distance** (60%) - point spacing and the number of artifacts the
//!   repair passes would find
//! - **Elevation** (30%) - agreement with a reference elevation source
//!
//! Scoring never mutates the document: repair passes run as dry runs on a
//! private copy.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{
    FirstNoiseOptions, IntersectionOptions, NoiseOptions, ReconcileOptions, StopOptions,
};
use crate::elevation::{reconcile_with_reference, ElevationSource};
use crate::geo_utils::path_length;
use crate::repair::{remove_first_noise, remove_intersections, remove_noise, remove_stops};
use crate::time::time_quality;
use crate::Document;

/// Average spacing (meters) above which the first penalty applies.
const SPARSE_SPACING: f64 = 8.0;
/// Average spacing (meters) above which the second penalty applies.
const VERY_SPARSE_SPACING: f64 = 30.0;
const SPARSE_PENALTY: f64 = 6.0;
const VERY_SPARSE_PENALTY: f64 = 12.0;

/// Per-finding weights of the dry-run passes.
const INTERSECTION_WEIGHT: f64 = 0.6;
const FIRST_NOISE_WEIGHT: f64 = 0.3;
const SIMPLIFY_WEIGHT: f64 = 0.2;
const NOISE_WEIGHT: f64 = 0.4;

/// Simplification distance (meters) of the dry run.
const SIMPLIFY_DISTANCE: f64 = 0.5;

const TIME_WEIGHT: f64 = 0.1;
const DISTANCE_WEIGHT: f64 = 0.6;
const ELEVATION_WEIGHT: f64 = 0.3;

/// Geometry quality from 0 to 100.
///
/// Starts at 100, loses 6 when the average point spacing exceeds 8 m and 12
/// more when it exceeds 30 m, then loses a weighted amount per finding of
/// dry-run intersection, first-noise, simplification and noise passes.
pub fn score_distance_quality(doc: &Document) -> f64 {
    let mut score = 100.0;

    let points = doc.point_count();
    if points > 0 {
        let length: f64 = doc
            .tracks
            .iter()
            .flat_map(|t| t.segments())
            .map(path_length)
            .sum();
        let spacing = length / points as f64;
        if spacing > SPARSE_SPACING {
            score -= SPARSE_PENALTY;
        }
        if spacing > VERY_SPARSE_SPACING {
            score -= VERY_SPARSE_PENALTY;
        }
    }

    let mut copy = doc.clone();
    let intersections = remove_intersections(
        &mut copy,
        &IntersectionOptions {
            lookahead: 5,
            ..IntersectionOptions::default()
        },
        false,
    )
    .len();
    let first_noise = remove_first_noise(&mut copy, &FirstNoiseOptions::default(), false).len();
    let simplify = remove_stops(&mut copy, &StopOptions::simplify(SIMPLIFY_DISTANCE), false).len();
    let noise = remove_noise(&mut copy, &NoiseOptions::default(), false).len();

    debug!(
        "[Quality] Dry run: {} intersections, {} first noise, {} simplify, {} noise",
        intersections, first_noise, simplify, noise
    );

    score -= intersections as f64 * INTERSECTION_WEIGHT
        + first_noise as f64 * FIRST_NOISE_WEIGHT
        + simplify as f64 * SIMPLIFY_WEIGHT
        + noise as f64 * NOISE_WEIGHT;
    score.max(0.0)
}

/// Component scores and their weighted combination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Time quality, floored at 0
    pub time: f64,
    pub distance: f64,
    /// Reference accuracy; 0 without a usable source
    pub elevation: f64,
    /// Weighted score rounded to two decimals
    pub score: f64,
}

/// Score a document from 0 to 100.
///
/// The elevation part counts 0 when no source is given or the source
/// cannot sample any point.
pub fn score_track(doc: &Document, source: Option<&dyn ElevationSource>) -> QualityReport {
    let time = f64::from(time_quality(doc).max(0));
    let distance = score_distance_quality(doc);
    let elevation = match source {
        Some(source) => {
            let mut copy = doc.clone();
            match reconcile_with_reference(&mut copy, source, &ReconcileOptions::default()) {
                Ok(report) => report.accuracy,
                Err(e) => {
                    warn!("[Quality] Elevation part scored 0: {}", e);
                    0.0
                }
            }
        }
        None => 0.0,
    };

    let weighted = time * TIME_WEIGHT + distance * DISTANCE_WEIGHT + elevation * ELEVATION_WEIGHT;
    QualityReport {
        time,
        distance,
        elevation,
        score: (weighted * 100.0).round() / 100.0,
    }
}
