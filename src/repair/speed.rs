//! Speed-based passes: horizontal outliers, a fast trailing tail and
//! vertical speed spikes.

use log::debug;

use super::{for_each_segment, SegmentOutcome};
use crate::config::{SpeedOptions, TrailingSpeedOptions, VerticalSpeedOptions};
use crate::geo_utils::{distance_2d, midpoint, Edge};
use crate::smoothing::smooth_elevation_range;
use crate::{Document, Finding, Point};

// ============================================================================
// Speed outliers
// ============================================================================

/// Index of the point among the next `lookahead` that is nearest to `start`.
fn closest_ahead(points: &[Point], start: usize, lookahead: usize) -> Option<usize> {
    let end = (start + 1 + lookahead).min(points.len());
    ((start + 1)..end).min_by(|&a, &b| {
        distance_2d(&points[start], &points[a]).total_cmp(&distance_2d(&points[start], &points[b]))
    })
}

fn heal_jumps(t: usize, s: usize, points: &[Point], options: &SpeedOptions, fix: bool) -> SegmentOutcome {
    let mut work = points.to_vec();
    let mut findings = Vec::new();
    let mut changed = false;

    for i in 0..work.len().saturating_sub(1) {
        let edge = Edge::between(&work[i], &work[i + 1], false);
        if edge.speed <= options.max_speed {
            continue;
        }
        findings.push(Finding::at(t, s, i, work[i]).with_edge(edge));
        if !fix {
            continue;
        }
        if let Some(partner) = closest_ahead(&work, i, options.lookahead) {
            let mid = midpoint(&work[i], &work[partner]);
            let target = &mut work[i + 1];
            target.latitude = mid.latitude;
            target.longitude = mid.longitude;
            if mid.elevation.is_some() {
                target.elevation = mid.elevation;
            }
            changed = true;
        }
    }

    SegmentOutcome {
        findings,
        rewrite: changed.then_some(work),
    }
}

/// Heal jumps faster than `max_speed` by moving the point after the jump
/// to the midpoint between the jump's origin and the nearest point ahead.
///
/// Timestamps are kept. Detection continues on the healed positions.
pub fn correct_speed_outliers(doc: &mut Document, options: &SpeedOptions, fix: bool) -> Vec<Finding> {
    let findings = for_each_segment(doc, fix, |t, s, points| {
        heal_jumps(t, s, points, options, fix)
    });
    debug!("[SpeedOutliers] {} findings (fix: {})", findings.len(), fix);
    findings
}

// ============================================================================
// Trailing speed
// ============================================================================

/// Find where a fast tail starts, scanning backward from the end.
///
/// Slow edges accumulate seconds; a fast edge resets them. The scan stops
/// once a slow run exceeds `sustained_seconds`. The cut point is the end of
/// that slow run, and only applies when a fast edge was seen after it.
fn fast_tail_start(points: &[Point], options: &TrailingSpeedOptions) -> Option<usize> {
    let n = points.len();
    let mut first = None;
    let mut seconds = 0.0;
    let mut saw_fast = false;
    let mut sustained = false;

    for w in (2..n).rev() {
        let edge = Edge::between(&points[w], &points[w - 1], false);
        if edge.duration < options.min_edge_seconds {
            continue;
        }
        if edge.speed < options.max_speed {
            if seconds == 0.0 {
                first = Some(w);
            }
            seconds += edge.duration;
            if seconds > options.sustained_seconds {
                sustained = true;
                break;
            }
        } else {
            saw_fast = true;
            seconds = 0.0;
        }
    }

    match first {
        Some(cut) if sustained && saw_fast && cut > 0 && cut + 1 < n => Some(cut),
        _ => None,
    }
}

/// Trim a fast tail (a recording left running in a vehicle).
pub fn trim_trailing_speed(
    doc: &mut Document,
    options: &TrailingSpeedOptions,
    fix: bool,
) -> Vec<Finding> {
    let findings = for_each_segment(doc, fix, |t, s, points| {
        if points.len() < options.min_segment_len {
            return SegmentOutcome::unchanged(Vec::new());
        }
        match fast_tail_start(points, options) {
            Some(cut) => SegmentOutcome {
                findings: vec![Finding::at(t, s, cut, points[cut]).with_count(points.len() - cut - 1)],
                rewrite: Some(points[..=cut].to_vec()),
            },
            None => SegmentOutcome::unchanged(Vec::new()),
        }
    });
    debug!("[TrailingSpeed] {} findings (fix: {})", findings.len(), fix);
    findings
}

// ============================================================================
// Vertical speed
// ============================================================================

fn smooth_spikes(
    t: usize,
    s: usize,
    points: &[Point],
    options: &VerticalSpeedOptions,
    fix: bool,
) -> SegmentOutcome {
    let mut work = points.to_vec();
    let mut findings = Vec::new();

    for i in 0..work.len().saturating_sub(1) {
        if work[i].elevation.is_none() || work[i + 1].elevation.is_none() {
            continue;
        }
        let edge = Edge::between(&work[i], &work[i + 1], false);
        if edge.duration <= 0.0 {
            continue;
        }
        let vertical = edge.vertical_speed.abs();
        if vertical <= options.max_vertical_speed {
            continue;
        }
        findings.push(Finding {
            vertical_speed: vertical,
            ..Finding::at(t, s, i, work[i]).with_edge(edge)
        });
        if fix {
            smooth_elevation_range(
                &mut work,
                i.saturating_sub(options.before),
                i + options.after,
                options.window,
                options.sigma,
            );
        }
    }

    let rewrite = (fix && !findings.is_empty()).then_some(work);
    SegmentOutcome { findings, rewrite }
}

/// Smooth elevation around edges climbing or descending faster than
/// `max_vertical_speed`. Points are never removed.
pub fn correct_vertical_speed(
    doc: &mut Document,
    options: &VerticalSpeedOptions,
    fix: bool,
) -> Vec<Finding> {
    let findings = for_each_segment(doc, fix, |t, s, points| {
        smooth_spikes(t, s, points, options, fix)
    });
    debug!("[VerticalSpeed] {} findings (fix: {})", findings.len(), fix);
    findings
}
