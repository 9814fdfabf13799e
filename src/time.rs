//! Timestamp repair and the time-quality metric.
//!
//! Repair walks a segment keeping the last trusted timestamp. A timestamp is
//! trusted when it is present, not earlier than the last trusted one, not
//! more than an hour after it, and not later than a plausible successor.
//! Untrusted timestamps are interpolated towards the next trustworthy
//! timestamp ahead, or pinned to the last trusted one when there is none.
//! After repair every segment's timestamps are non-decreasing.

use chrono::{DateTime, Duration, TimeZone, Utc};
use log::debug;

use crate::{Document, Point};

/// Largest forward step accepted between consecutive timestamps.
const MAX_STEP_SECONDS: i64 = 3600;

/// Offset given to a first timestamp that is later than the second one.
const FIRST_POINT_OFFSET_SECONDS: i64 = 10;

/// True when `t` is after 2000-01-01 and not in the future.
pub fn is_plausible(t: DateTime<Utc>) -> bool {
    let floor = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
    floor.map_or(false, |floor| t > floor) && t <= Utc::now()
}

/// Next timestamp after index `i` usable as an interpolation target.
fn next_target(points: &[Point], i: usize, last: DateTime<Utc>) -> Option<(usize, DateTime<Utc>)> {
    let max_step = Duration::seconds(MAX_STEP_SECONDS);
    points
        .iter()
        .enumerate()
        .skip(i + 1)
        .find_map(|(j, p)| match p.time {
            Some(t) if t > last && t < last + max_step => Some((j, t)),
            _ => None,
        })
}

/// Repair the timestamps of one segment.
///
/// Returns the repaired points and the number of corrected timestamps.
pub fn repair_segment_times(points: &[Point]) -> (Vec<Point>, usize) {
    let mut out = points.to_vec();
    let n = out.len();
    if n < 2 {
        return (out, 0);
    }
    let mut corrections = 0;

    if out[0].time.is_none() {
        match out.iter().find_map(|p| p.time) {
            Some(t) => {
                out[0].time = Some(t);
                corrections += 1;
            }
            None => return (out, 0),
        }
    }
    if let (Some(t0), Some(t1)) = (out[0].time, out[1].time) {
        if t0 > t1 {
            out[0].time = Some(t1 - Duration::seconds(FIRST_POINT_OFFSET_SECONDS));
            corrections += 1;
        }
    }

    let max_step = Duration::seconds(MAX_STEP_SECONDS);
    let mut last = match out[0].time {
        Some(t) => t,
        None => return (out, corrections),
    };

    for i in 1..n {
        let next = out.get(i + 1).and_then(|p| p.time);
        let trusted = match out[i].time {
            Some(t) => {
                let in_window = t >= last && t <= last + max_step;
                let spikes_past_next = matches!(next, Some(nt) if nt >= last && t > nt);
                in_window && !spikes_past_next
            }
            None => false,
        };
        if trusted {
            if let Some(t) = out[i].time {
                last = t;
            }
            continue;
        }

        let repaired = match next_target(&out, i, last) {
            Some((j, target)) => {
                let steps = (j - i + 1) as i32;
                last + (target - last) / steps
            }
            None => last,
        };
        out[i].time = Some(repaired);
        corrections += 1;
        last = repaired;
    }

    (out, corrections)
}

/// Repair the timestamps of every segment.
///
/// Returns the number of corrected timestamps; the document only changes
/// when `fix` is set.
pub fn repair_times(doc: &mut Document, fix: bool) -> usize {
    let mut total = 0;
    for track in &mut doc.tracks {
        for s in 0..track.segment_count() {
            let (repaired, corrections) = repair_segment_times(track.segment(s));
            total += corrections;
            if fix && corrections > 0 {
                for (point, fixed) in track.segment_mut(s).iter_mut().zip(repaired) {
                    point.time = fixed.time;
                }
            }
        }
    }
    debug!("[TimeRepair] {} corrections (fix: {})", total, fix);
    total
}

/// Timestamp consistency score from 0 to 100, or -1 for an empty document.
///
/// Each point without a plausible timestamp costs 1 penalty point; each
/// timestamp earlier than its predecessor costs 4.
pub fn time_quality(doc: &Document) -> i32 {
    let mut total: i64 = 0;
    let mut penalty: i64 = 0;

    for track in &doc.tracks {
        for segment in track.segments() {
            let mut previous: Option<DateTime<Utc>> = None;
            for point in segment {
                total += 1;
                match point.time {
                    Some(t) => {
                        if !is_plausible(t) {
                            penalty += 1;
                        }
                        if previous.is_some_and(|p| t < p) {
                            penalty += 4;
                        }
                        previous = Some(t);
                    }
                    None => penalty += 1,
                }
            }
        }
    }

    if total == 0 {
        return -1;
    }
    (100 - penalty * 100 / total).max(0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Track;

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn segment(times: &[Option<i64>]) -> Vec<Point> {
        times
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let p = Point::new(45.0 + i as f64 * 0.0001, 7.0);
                match s {
                    Some(s) => p.with_time(t(*s)),
                    None => p,
                }
            })
            .collect()
    }

    fn assert_monotonic(points: &[Point]) {
        for w in points.windows(2) {
            assert!(w[0].time <= w[1].time, "{:?} > {:?}", w[0].time, w[1].time);
        }
    }

    #[test]
    fn test_clean_segment_untouched() {
        let points = segment(&[Some(0), Some(1), Some(2), Some(3)]);
        let (repaired, count) = repair_segment_times(&points);
        assert_eq!(count, 0);
        assert_eq!(repaired, points);
    }

    #[test]
    fn test_first_point_after_second() {
        let points = segment(&[Some(100), Some(5), Some(6)]);
        let (repaired, count) = repair_segment_times(&points);
        assert_eq!(count, 1);
        assert_eq!(repaired[0].time, Some(t(-5)));
        assert_monotonic(&repaired);
    }

    #[test]
    fn test_missing_timestamp_interpolated() {
        let points = segment(&[Some(0), None, None, Some(30)]);
        let (repaired, count) = repair_segment_times(&points);
        assert_eq!(count, 2);
        assert_eq!(repaired[1].time, Some(t(10)));
        assert_eq!(repaired[2].time, Some(t(20)));
    }

    #[test]
    fn test_backward_jump_repaired() {
        let points = segment(&[Some(0), Some(10), Some(-500), Some(30), Some(40)]);
        let (repaired, count) = repair_segment_times(&points);
        assert_eq!(count, 1);
        assert_eq!(repaired[2].time, Some(t(20)));
        assert_monotonic(&repaired);
    }

    #[test]
    fn test_forward_spike_repaired() {
        let points = segment(&[Some(0), Some(10), Some(9000), Some(30), Some(40)]);
        let (repaired, count) = repair_segment_times(&points);
        assert_eq!(count, 1);
        assert_eq!(repaired[2].time, Some(t(20)));
        assert_monotonic(&repaired);
    }

    #[test]
    fn test_no_target_pins_to_last() {
        let points = segment(&[Some(0), Some(10), None, None]);
        let (repaired, count) = repair_segment_times(&points);
        assert_eq!(count, 2);
        assert_eq!(repaired[2].time, Some(t(10)));
        assert_eq!(repaired[3].time, Some(t(10)));
    }

    #[test]
    fn test_monotonic_after_repair_of_chaos() {
        let points = segment(&[
            Some(50),
            Some(3),
            None,
            Some(2),
            Some(7200),
            Some(8),
            Some(8),
            None,
            Some(-100),
            Some(20),
        ]);
        let (repaired, _) = repair_segment_times(&points);
        assert!(repaired.iter().all(|p| p.time.is_some()));
        assert_monotonic(&repaired);
    }

    #[test]
    fn test_repair_times_respects_fix() {
        let mut doc = Document::new(
            "",
            vec![Track::from_segments(vec![segment(&[Some(0), None, Some(20)])])],
        );
        let before = doc.clone();
        assert_eq!(repair_times(&mut doc, false), 1);
        assert_eq!(doc, before);
        assert_eq!(repair_times(&mut doc, true), 1);
        assert_eq!(doc.tracks[0].segment(0)[1].time, Some(t(10)));
        assert_eq!(repair_times(&mut doc, true), 0);
    }

    #[test]
    fn test_time_quality() {
        let clean = Document::new(
            "",
            vec![Track::from_segments(vec![segment(&[Some(0), Some(1), Some(2), Some(3)])])],
        );
        assert_eq!(time_quality(&clean), 100);

        // one missing (1) and one going backwards (4) over 10 points
        let mut times: Vec<Option<i64>> = (0..10).map(Some).collect();
        times[3] = None;
        times[7] = Some(2);
        let doc = Document::new("", vec![Track::from_segments(vec![segment(&times)])]);
        assert_eq!(time_quality(&doc), 50);

        assert_eq!(time_quality(&Document::default()), -1);

        let untimed = Document::new("", vec![Track::from_segments(vec![segment(&[None, None])])]);
        assert_eq!(time_quality(&untimed), 0);
    }

    #[test]
    fn test_plausible() {
        assert!(is_plausible(t(0)));
        assert!(!is_plausible(Utc.with_ymd_and_hms(1999, 12, 31, 0, 0, 0).unwrap()));
        assert!(!is_plausible(Utc::now() + Duration::days(2)));
    }
}
