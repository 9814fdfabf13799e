//! Stop and near-duplicate removal.
//!
//! A run starts at an anchor point and grows while the following points
//! stay within `max_distance` and `max_elevation` of the anchor. A run with
//! more than `min_points` followers lasting longer than `min_seconds`
//! collapses to its anchor (plus its last point when `keep_boundary` is
//! set). Runs that do not qualify, or would lose no point, are kept as
//! they are.

use log::debug;

use super::{for_each_segment, SegmentOutcome};
use crate::config::StopOptions;
use crate::geo_utils::{elevation_delta, haversine_points, time_diff};
use crate::{Document, Finding, Point};

fn collapse_runs(t: usize, s: usize, points: &[Point], options: &StopOptions) -> SegmentOutcome {
    let n = points.len();
    let mut findings = Vec::new();
    let mut kept = Vec::with_capacity(n);
    let mut i = 0;

    while i < n {
        let anchor = &points[i];
        let mut j = i + 1;
        while j < n
            && haversine_points(anchor, &points[j]) <= options.max_distance
            && elevation_delta(anchor, &points[j]).abs() <= options.max_elevation
        {
            j += 1;
        }

        let followers = j - i - 1;
        let last = j - 1;
        let seconds = time_diff(anchor, &points[last]);
        let long_enough = options.min_seconds == 0.0 || seconds > options.min_seconds;

        let keep_last = options.keep_boundary;
        let removed = if keep_last {
            followers.saturating_sub(1)
        } else {
            followers
        };

        if removed > 0 && followers > options.min_points && long_enough {
            findings.push(Finding {
                duration: seconds,
                length: haversine_points(anchor, &points[last]),
                ..Finding::at(t, s, i, *anchor).with_count(removed)
            });
            kept.push(*anchor);
            if keep_last {
                kept.push(points[last]);
            }
        } else {
            kept.extend_from_slice(&points[i..j]);
        }
        i = j;
    }

    if findings.is_empty() {
        SegmentOutcome::unchanged(findings)
    } else {
        SegmentOutcome {
            findings,
            rewrite: Some(kept),
        }
    }
}

/// Collapse stops (long runs of points that barely move).
pub fn remove_stops(doc: &mut Document, options: &StopOptions, fix: bool) -> Vec<Finding> {
    let findings = for_each_segment(doc, fix, |t, s, points| {
        collapse_runs(t, s, points, options)
    });
    debug!("[Stops] {} findings (fix: {})", findings.len(), fix);
    findings
}

/// Drop points closer than `max_distance` to the point kept before them.
pub fn simplify_points(doc: &mut Document, max_distance: f64, fix: bool) -> Vec<Finding> {
    remove_stops(doc, &StopOptions::simplify(max_distance), fix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::test_support::{doc_of, straight_line};
    use chrono::Duration;

    /// Moving line with a 120 s stop of 10 points in the middle.
    fn track_with_stop() -> Vec<Point> {
        let mut points = straight_line(20, 10.0);
        let stop_at = points[9];
        let mut stop: Vec<Point> = (1..=10)
            .map(|k| {
                let mut p = stop_at;
                p.longitude += 0.000005 * (k % 2) as f64;
                p.time = Some(stop_at.time.unwrap() + Duration::seconds(k * 12));
                p
            })
            .collect();
        let mut tail: Vec<Point> = points.split_off(10);
        for p in &mut tail {
            p.time = Some(p.time.unwrap() + Duration::seconds(121));
        }
        points.append(&mut stop);
        points.append(&mut tail);
        points
    }

    #[test]
    fn test_stop_collapsed() {
        let mut doc = doc_of(vec![track_with_stop()]);
        assert_eq!(doc.tracks[0].point_count(), 30);
        let findings = remove_stops(&mut doc, &StopOptions::default(), true);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.point, 9);
        assert_eq!(findings[0].count, 9);
        assert!(findings[0].duration > 90.0);
        // anchor and boundary point survive
        assert_eq!(doc.tracks[0].point_count(), 21);
    }

    #[test]
    fn test_short_pause_kept() {
        let mut options = StopOptions::default();
        options.min_seconds = 300.0;
        let mut doc = doc_of(vec![track_with_stop()]);
        assert!(remove_stops(&mut doc, &options, true).is_empty());
        assert_eq!(doc.tracks[0].point_count(), 30);
    }

    #[test]
    fn test_without_boundary() {
        let mut options = StopOptions::default();
        options.keep_boundary = false;
        let mut doc = doc_of(vec![track_with_stop()]);
        let findings = remove_stops(&mut doc, &options, true);
        assert_eq!(findings[0].count, 10);
        assert_eq!(doc.tracks[0].point_count(), 20);
    }

    #[test]
    fn test_single_follower_with_boundary_is_not_reported() {
        let line = straight_line(3, 10.0);
        let points = vec![line[0], line[0], line[1], line[2]];
        let options = StopOptions {
            min_points: 0,
            min_seconds: 0.0,
            keep_boundary: true,
            ..StopOptions::default()
        };
        let mut doc = doc_of(vec![points]);
        assert!(remove_stops(&mut doc, &options, true).is_empty());
        assert_eq!(doc.tracks[0].point_count(), 4);

        let options = StopOptions {
            keep_boundary: false,
            ..options
        };
        let findings = remove_stops(&mut doc, &options, true);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].count, 1);
        assert_eq!(doc.tracks[0].point_count(), 3);
    }

    #[test]
    fn test_simplify_without_times() {
        let mut points: Vec<Point> = straight_line(10, 0.2);
        for p in &mut points {
            p.time = None;
        }
        let mut doc = doc_of(vec![points]);
        let findings = simplify_points(&mut doc, 0.5, true);
        assert!(!findings.is_empty());
        // 0.2 m spacing: each kept point swallows the next two
        assert_eq!(doc.tracks[0].point_count(), 4);
    }

    #[test]
    fn test_clean_track_has_no_stops() {
        let mut doc = doc_of(vec![straight_line(100, 5.0)]);
        let simplify = StopOptions::simplify(0.5);
        for _ in 0..2 {
            assert!(remove_stops(&mut doc, &StopOptions::default(), false).is_empty());
            assert!(remove_stops(&mut doc, &simplify, false).is_empty());
        }
    }
}
