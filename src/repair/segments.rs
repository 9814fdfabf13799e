//! Short-segment merge.
//!
//! Segments with fewer than `min_points` points are merged into the
//! neighbouring segment that is closer in time. Merges are boundary edits
//! on the track's point arena, applied in reverse segment order so earlier
//! indices stay valid.

use log::debug;

use crate::config::JoinOptions;
use crate::geo_utils::time_diff;
use crate::{Document, Finding, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    Previous(usize),
    Next(usize),
    Drop(usize),
}

/// Seconds between the end of segment `a` and the start of segment `b`.
fn gap_seconds(track: &Track, a: usize, b: usize) -> f64 {
    match (track.segment(a).last(), track.segment(b).first()) {
        (Some(end), Some(start)) if end.time.is_some() && start.time.is_some() => {
            time_diff(end, start)
        }
        _ => f64::INFINITY,
    }
}

fn plan_merges(t: usize, track: &Track, min_points: usize) -> (Vec<Merge>, Vec<Finding>) {
    let mut merges = Vec::new();
    let mut findings = Vec::new();
    let count = track.segment_count();

    for s in 0..count {
        let points = track.segment(s);
        if points.len() >= min_points {
            continue;
        }
        if points.is_empty() {
            merges.push(Merge::Drop(s));
            continue;
        }
        let previous = if s > 0 {
            gap_seconds(track, s - 1, s)
        } else {
            f64::INFINITY
        };
        let next = if s + 1 < count {
            gap_seconds(track, s, s + 1)
        } else {
            f64::INFINITY
        };

        let into_previous = s > 0 && (s + 1 == count || previous < next);
        if into_previous {
            findings.push(Finding {
                duration: previous,
                ..Finding::at(t, s, 0, points[0]).with_count(points.len())
            });
            merges.push(Merge::Previous(s));
        } else {
            let last = points.len() - 1;
            findings.push(Finding {
                duration: next,
                ..Finding::at(t, s, last, points[last]).with_count(points.len())
            });
            merges.push(Merge::Next(s));
        }
    }
    (merges, findings)
}

fn apply_merges(track: &mut Track, merges: &[Merge]) {
    for merge in merges.iter().rev() {
        match *merge {
            Merge::Drop(s) => track.remove_segment(s),
            Merge::Previous(s) => {
                if !track.merge_into_previous(s) {
                    track.merge_into_next(s);
                }
            }
            Merge::Next(s) => {
                if !track.merge_into_next(s) {
                    track.merge_into_previous(s);
                }
            }
        }
    }
}

/// Merge short segments of multi-segment tracks into a neighbour.
pub fn join_segments(doc: &mut Document, options: &JoinOptions, fix: bool) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (t, track) in doc.tracks.iter_mut().enumerate() {
        if track.segment_count() < 2 {
            continue;
        }
        let (merges, found) = plan_merges(t, track, options.min_points);
        if fix {
            apply_merges(track, &merges);
        }
        findings.extend(found);
    }
    debug!("[JoinSegments] {} findings (fix: {})", findings.len(), fix);
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repair::test_support::{start_time, straight_line};
    use crate::Point;
    use chrono::Duration;

    fn shifted(points: Vec<Point>, seconds: i64) -> Vec<Point> {
        points
            .into_iter()
            .map(|mut p| {
                p.time = p.time.map(|t| t + Duration::seconds(seconds));
                p
            })
            .collect()
    }

    #[test]
    fn test_short_segment_joins_closer_neighbour() {
        // 0..30 s, then a 3-point segment 5 s later, then 600 s later
        let a = straight_line(30, 5.0);
        let b = shifted(straight_line(3, 5.0), 34);
        let c = shifted(straight_line(30, 5.0), 637);
        let mut doc = Document::new("", vec![Track::from_segments(vec![a, b, c])]);

        let findings = join_segments(&mut doc, &JoinOptions::default(), true);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.segment, 1);
        assert_eq!(findings[0].count, 3);

        let track = &doc.tracks[0];
        assert_eq!(track.segment_count(), 2);
        assert_eq!(track.segment(0).len(), 33);
        assert_eq!(track.segment(1).len(), 30);
        assert_eq!(track.point_count(), 63);
    }

    #[test]
    fn test_short_segment_joins_next_when_closer() {
        let a = straight_line(30, 5.0);
        let b = shifted(straight_line(3, 5.0), 600);
        let c = shifted(straight_line(30, 5.0), 605);
        let mut doc = Document::new("", vec![Track::from_segments(vec![a, b, c])]);

        join_segments(&mut doc, &JoinOptions::default(), true);
        let track = &doc.tracks[0];
        assert_eq!(track.segment_count(), 2);
        assert_eq!(track.segment(0).len(), 30);
        assert_eq!(track.segment(1).len(), 33);
        assert_eq!(track.segment(1)[0].time, Some(start_time() + Duration::seconds(600)));
    }

    #[test]
    fn test_adjacent_short_segments_keep_every_point() {
        let a = straight_line(30, 5.0);
        let b = shifted(straight_line(2, 5.0), 31);
        let c = shifted(straight_line(2, 5.0), 34);
        let d = shifted(straight_line(30, 5.0), 37);
        let mut doc = Document::new("", vec![Track::from_segments(vec![a, b, c, d])]);

        let findings = join_segments(&mut doc, &JoinOptions::default(), true);
        assert_eq!(findings.len(), 2);
        assert_eq!(doc.tracks[0].point_count(), 64);
        assert_eq!(doc.tracks[0].segment_count(), 2);
    }

    #[test]
    fn test_single_segment_and_dry_run() {
        let mut doc = Document::new(
            "",
            vec![Track::from_segments(vec![straight_line(3, 5.0)])],
        );
        assert!(join_segments(&mut doc, &JoinOptions::default(), true).is_empty());

        let a = straight_line(30, 5.0);
        let b = shifted(straight_line(3, 5.0), 40);
        let mut doc = Document::new("", vec![Track::from_segments(vec![a, b])]);
        let before = doc.clone();
        assert_eq!(join_segments(&mut doc, &JoinOptions::default(), false).len(), 1);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_empty_segment_dropped() {
        let a = straight_line(30, 5.0);
        let c = shifted(straight_line(30, 5.0), 40);
        let mut doc = Document::new("", vec![Track::from_segments(vec![a, Vec::new(), c])]);
        assert!(join_segments(&mut doc, &JoinOptions::default(), true).is_empty());
        assert_eq!(doc.tracks[0].segment_count(), 2);
    }
}
