//! # Point-Repair Passes
//!
//! Independent passes that detect recording artifacts and, with
//! `fix = true`, rewrite the affected segments.
//!
//! ## Passes
//! - **First noise** - GPS settling at the start of a recording
//! - **Noise** - isolated spikes anywhere in a segment
//! - **Stops** - runs of points that stay near an anchor point
//! - **Intersections** - small self-crossing loops
//! - **Speed outliers** - jumps healed with a midpoint
//! - **Trailing speed** - a fast tail left recording in a vehicle
//! - **Vertical speed** - elevation spikes smoothed locally
//! - **Segment join** - short segments merged into a neighbour
//!
//! Every pass returns its [`Finding`]s whether or not it fixes anything.
//! A segment is rewritten only after the pass has computed its full
//! replacement, so a pass is never observed half-applied.

mod intersections;
mod noise;
mod segments;
mod speed;
mod stops;

use crate::{Document, Finding, Point};

pub use intersections::{remove_intersections, remove_intersections_until_stable};
pub use noise::{remove_first_noise, remove_noise};
pub use segments::join_segments;
pub use speed::{correct_speed_outliers, correct_vertical_speed, trim_trailing_speed};
pub use stops::{remove_stops, simplify_points};

/// Result of running a pass over one segment.
pub(crate) struct SegmentOutcome {
    pub findings: Vec<Finding>,
    /// Replacement points, when the pass changed the segment
    pub rewrite: Option<Vec<Point>>,
}

impl SegmentOutcome {
    pub fn unchanged(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            rewrite: None,
        }
    }
}

/// Run a per-segment pass over every segment of the document.
///
/// `pass` receives (track index, segment index, points). Rewrites are
/// committed only when `fix` is set.
pub(crate) fn for_each_segment<F>(doc: &mut Document, fix: bool, mut pass: F) -> Vec<Finding>
where
    F: FnMut(usize, usize, &[Point]) -> SegmentOutcome,
{
    let mut findings = Vec::new();
    for (t, track) in doc.tracks.iter_mut().enumerate() {
        for s in 0..track.segment_count() {
            let outcome = pass(t, s, track.segment(s));
            findings.extend(outcome.findings);
            if fix {
                if let Some(points) = outcome.rewrite {
                    track.replace_segment(s, points);
                }
            }
        }
    }
    findings
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::{Document, Point, Track};

    pub fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap()
    }

    /// `n` points heading north, `step` meters apart, one second apart.
    pub fn straight_line(n: usize, step: f64) -> Vec<Point> {
        let deg = step / crate::geo_utils::ONE_DEGREE;
        (0..n)
            .map(|i| {
                Point::new(45.0 + i as f64 * deg, 7.0)
                    .with_elevation(300.0)
                    .with_time(start_time() + Duration::seconds(i as i64))
            })
            .collect()
    }

    pub fn doc_of(segments: Vec<Vec<Point>>) -> Document {
        Document::new("test", vec![Track::from_segments(segments)])
    }
}
