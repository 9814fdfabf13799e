//! Self-intersection removal.
//!
//! For each edge (w, w+1) the next `lookahead` edges are searched for one
//! that crosses it. When edge (j, j+1) does, points w+1..=j form a loop and
//! are dropped so the track runs straight from w to j+1.

use log::debug;

use super::{for_each_segment, SegmentOutcome};
use crate::config::IntersectionOptions;
use crate::geo_utils::segments_intersect;
use crate::{Document, Finding, Point};

fn cut_loops(t: usize, s: usize, points: &[Point], lookahead: usize) -> SegmentOutcome {
    let n = points.len();
    let mut findings = Vec::new();
    let mut kept = Vec::with_capacity(n);
    let mut w = 0;

    while w < n {
        kept.push(points[w]);
        if w + 1 >= n {
            break;
        }
        let limit = (w + lookahead).min(n - 1);
        let crossing = ((w + 2)..limit).find(|&j| {
            segments_intersect(&points[w], &points[w + 1], &points[j], &points[j + 1])
        });
        match crossing {
            Some(j) => {
                findings.push(Finding::at(t, s, w, points[w]).with_count(j - w));
                w = j + 1;
            }
            None => w += 1,
        }
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

/// Remove small self-crossing loops in one pass.
pub fn remove_intersections(
    doc: &mut Document,
    options: &IntersectionOptions,
    fix: bool,
) -> Vec<Finding> {
    let findings = for_each_segment(doc, fix, |t, s, points| {
        cut_loops(t, s, points, options.lookahead)
    });
    debug!("[Intersections] {} findings (fix: {})", findings.len(), fix);
    findings
}

/// Repeat intersection removal until a pass finds nothing or the
/// iteration cap is reached.
///
/// Returns every finding and the number of passes run.
pub fn remove_intersections_until_stable(
    doc: &mut Document,
    options: &IntersectionOptions,
) -> (Vec<Finding>, usize) {
    let mut all = Vec::new();
    let mut iterations = 0;
    while iterations < options.max_iterations {
        iterations += 1;
        let findings = remove_intersections(doc, options, true);
        if findings.is_empty() {
            break;
        }
        all.extend(findings);
    }
    debug!(
        "[Intersections] Stable after {} iteration(s), {} findings",
        iterations,
        all.len()
    );
    (all, iterations)
}
