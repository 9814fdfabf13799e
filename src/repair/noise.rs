//! Noise removal by skipping to a closer later point.
//!
//! A point is noise when a point shortly after it is closer to its
//! predecessor than the immediate next point is. The points in between are
//! dropped and the scan continues after the closer point.

use log::debug;

use super::{for_each_segment, SegmentOutcome};
use crate::config::{FirstNoiseOptions, NoiseOptions};
use crate::geo_utils::{elevation_delta, haversine_points};
use crate::{Document, Finding, Point};

/// Closest later point within `window` that is nearer than `max_distance`
/// and within `max_elevation`.
fn find_next_closer(
    points: &[Point],
    start: usize,
    window: usize,
    max_distance: f64,
    max_elevation: f64,
) -> Option<(usize, f64)> {
    let end = (start + window).min(points.len());
    let mut best: Option<(usize, f64)> = None;
    for j in (start + 1)..end {
        let d = haversine_points(&points[start], &points[j]);
        let e = elevation_delta(&points[start], &points[j]).abs();
        let closer = best.map_or(true, |(_, min)| d < min);
        if closer && d < max_distance && e <= max_elevation {
            best = Some((j, d));
        }
    }
    best
}

/// Skip noise among the first `limit` points; the rest is kept verbatim.
fn skip_noise(
    t: usize,
    s: usize,
    points: &[Point],
    limit: usize,
    window: usize,
    max_distance: f64,
    max_elevation: f64,
) -> SegmentOutcome {
    let n = points.len();
    let mut findings = Vec::new();
    let mut kept = Vec::with_capacity(n);
    let mut i = 0;

    while i < n && i < limit {
        if i + 1 >= n {
            kept.push(points[i]);
            i += 1;
            break;
        }
        let next = haversine_points(&points[i], &points[i + 1]);
        match find_next_closer(points, i, window, max_distance, max_elevation) {
            Some((closer, d)) if next > d => {
                findings.push(Finding {
                    length: next,
                    ..Finding::at(t, s, i, points[i]).with_count(closer - i - 1)
                });
                kept.push(points[i]);
                kept.push(points[closer]);
                i = closer + 1;
            }
            _ => {
                kept.push(points[i]);
                i += 1;
            }
        }
    }
    if i < n {
        kept.extend_from_slice(&points[i..]);
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

/// Remove GPS settling noise from the start of long segments.
pub fn remove_first_noise(
    doc: &mut Document,
    options: &FirstNoiseOptions,
    fix: bool,
) -> Vec<Finding> {
    let findings = for_each_segment(doc, fix, |t, s, points| {
        if points.len() < options.min_segment_len {
            return SegmentOutcome::unchanged(Vec::new());
        }
        skip_noise(
            t,
            s,
            points,
            options.leading_points,
            options.window,
            options.max_distance,
            options.max_elevation,
        )
    });
    debug!("[FirstNoise] {} findings (fix: {})", findings.len(), fix);
    findings
}

/// Remove isolated spikes anywhere in every segment.
pub fn remove_noise(doc: &mut Document, options: &NoiseOptions, fix: bool) -> Vec<Finding> {
    let findings = for_each_segment(doc, fix, |t, s, points| {
        skip_noise(
            t,
            s,
            points,
            points.len(),
            options.window,
            options.max_distance,
            options.max_elevation,
        )
    });
    debug!("[Noise] {} findings (fix: {})", findings.len(), fix);
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::test_support::{doc_of, straight_line};

    /// Clustered points with one spike at index 2.
    fn spiky_segment(n: usize) -> Vec<Point> {
        let mut points = straight_line(n, 2.0);
        points[2].longitude += 0.0002; // ~15 m east
        points
    }

    #[test]
    fn test_noise_spike_removed() {
        let mut doc = doc_of(vec![spiky_segment(20)]);
        let findings = remove_noise(&mut doc, &NoiseOptions::default(), true);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.point, 1);
        assert_eq!(findings[0].count, 1);
        assert_eq!(doc.tracks[0].point_count(), 19);
        assert!(doc.tracks[0]
            .points()
            .iter()
            .all(|p| (p.longitude - 7.0).abs() < 1e-9));
    }

    #[test]
    fn test_dry_run_leaves_document() {
        let mut doc = doc_of(vec![spiky_segment(20)]);
        let before = doc.clone();
        let findings = remove_noise(&mut doc, &NoiseOptions::default(), false);
        assert_eq!(findings.len(), 1);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_clean_track_has_no_noise() {
        let mut doc = doc_of(vec![straight_line(100, 5.0)]);
        assert!(remove_noise(&mut doc, &NoiseOptions::default(), false).is_empty());
        assert!(remove_noise(&mut doc, &NoiseOptions::default(), false).is_empty());
    }

    #[test]
    fn test_first_noise_only_long_segments() {
        let mut doc = doc_of(vec![spiky_segment(20)]);
        assert!(remove_first_noise(&mut doc, &FirstNoiseOptions::default(), true).is_empty());
        assert_eq!(doc.tracks[0].point_count(), 20);

        let mut doc = doc_of(vec![spiky_segment(100)]);
        let findings = remove_first_noise(&mut doc, &FirstNoiseOptions::default(), true);
        assert_eq!(findings.len(), 1);
        assert_eq!(doc.tracks[0].point_count(), 99);
    }

    #[test]
    fn test_first_noise_ignores_later_spikes() {
        let mut points = straight_line(100, 2.0);
        points[50].longitude += 0.0002;
        let mut doc = doc_of(vec![points]);
        assert!(remove_first_noise(&mut doc, &FirstNoiseOptions::default(), true).is_empty());
        assert_eq!(doc.tracks[0].point_count(), 100);
    }
}
