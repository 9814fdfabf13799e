//! Gaussian smoothing of positions and elevations.
//!
//! Each point becomes the weighted average of its neighbours within a
//! symmetric window, weighted by a gaussian of the index offset. Weights are
//! normalised by the sum actually used, so edge points get a truncated
//! window. Point counts never change.

use crate::config::SmoothingOptions;
use crate::{Document, Point};

/// Gaussian kernel value at offset `x`.
pub fn gaussian(x: f64, sigma: f64) -> f64 {
    let coefficient = 1.0 / (sigma * (2.0 * std::f64::consts::PI).sqrt());
    coefficient * (-(x * x) / (2.0 * sigma * sigma)).exp()
}

/// Smooth latitude and longitude of a segment in place.
///
/// Every output is computed from the original positions.
pub fn smooth_positions(points: &mut [Point], window: usize, sigma: f64) {
    let n = points.len();
    if n < 2 || window == 0 {
        return;
    }
    let original: Vec<(f64, f64)> = points.iter().map(|p| (p.latitude, p.longitude)).collect();

    for (i, point) in points.iter_mut().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window).min(n - 1);

        let mut lat = 0.0;
        let mut lon = 0.0;
        let mut weights = 0.0;
        for (j, &(p_lat, p_lon)) in original.iter().enumerate().take(hi + 1).skip(lo) {
            let w = gaussian(j as f64 - i as f64, sigma);
            lat += p_lat * w;
            lon += p_lon * w;
            weights += w;
        }
        if weights > 0.0 {
            point.latitude = lat / weights;
            point.longitude = lon / weights;
        }
    }
}

/// Smooth elevations of `points[start..end]` in place.
///
/// Neighbours are restricted to the same sub-range; points without an
/// elevation neither contribute nor get one assigned.
pub fn smooth_elevation_range(
    points: &mut [Point],
    start: usize,
    end: usize,
    window: usize,
    sigma: f64,
) {
    let end = end.min(points.len());
    if start >= end || window == 0 {
        return;
    }
    let original: Vec<Option<f64>> = points[start..end].iter().map(|p| p.elevation).collect();

    for i in start..end {
        if original[i - start].is_none() {
            continue;
        }
        let lo = i.saturating_sub(window).max(start);
        let hi = (i + window).min(end - 1);

        let mut sum = 0.0;
        let mut weights = 0.0;
        for j in lo..=hi {
            if let Some(ele) = original[j - start] {
                let w = gaussian(j as f64 - i as f64, sigma);
                sum += ele * w;
                weights += w;
            }
        }
        if weights > 0.0 {
            points[i].elevation = Some(sum / weights);
        }
    }
}

const MOVE_EPSILON: f64 = 1e-12;

/// Smooth the positions of every segment of a document.
///
/// Returns the number of points whose position moved.
pub fn smooth_document_positions(doc: &mut Document, options: &SmoothingOptions) -> usize {
    let mut moved = 0;
    for track in &mut doc.tracks {
        for s in 0..track.segment_count() {
            let segment = track.segment_mut(s);
            let before: Vec<(f64, f64)> =
                segment.iter().map(|p| (p.latitude, p.longitude)).collect();
            smooth_positions(segment, options.window, options.sigma);
            moved += segment
                .iter()
                .zip(before)
                .filter(|(p, (lat, lon))| {
                    (p.latitude - lat).abs() > MOVE_EPSILON || (p.longitude - lon).abs() > MOVE_EPSILON
                })
                .count();
        }
    }
    log::debug!("[Smoothing] Moved {} points", moved);
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Track;

    #[test]
    fn test_gaussian_peak() {
        let sigma = 1.0;
        let peak = gaussian(0.0, sigma);
        assert!((peak - 0.398_942_28).abs() < 1e-6);
        assert!(gaussian(1.0, sigma) < peak);
        assert_eq!(gaussian(1.0, sigma), gaussian(-1.0, sigma));
    }

    #[test]
    fn test_straight_line_is_stable() {
        let mut points: Vec<Point> = (0..10)
            .map(|i| Point::new(45.0 + i as f64 * 0.001, 7.0))
            .collect();
        smooth_positions(&mut points, 1, 1.1);
        // Interior points of an evenly spaced line stay put
        for (i, p) in points.iter().enumerate().take(9).skip(1) {
            assert!((p.latitude - (45.0 + i as f64 * 0.001)).abs() < 1e-9);
        }
        assert_eq!(points.len(), 10);
    }

    #[test]
    fn test_spike_is_damped() {
        let mut points: Vec<Point> = (0..5).map(|_| Point::new(45.0, 7.0)).collect();
        points[2].latitude = 45.01;
        smooth_positions(&mut points, 1, 1.1);
        assert!(points[2].latitude < 45.01);
        assert!(points[1].latitude > 45.0);
        assert!((points[4].latitude - 45.0).abs() < 1e-12);
    }

    #[test]
    fn test_elevation_range_only() {
        let mut points: Vec<Point> = (0..8)
            .map(|i| Point::new(45.0, 7.0).with_elevation(if i == 4 { 200.0 } else { 100.0 }))
            .collect();
        smooth_elevation_range(&mut points, 2, 7, 3, 1.5);
        assert_eq!(points[0].elevation, Some(100.0));
        assert_eq!(points[1].elevation, Some(100.0));
        assert_eq!(points[7].elevation, Some(100.0));
        let spike = points[4].elevation.unwrap();
        assert!(spike < 200.0 && spike > 100.0);
    }

    #[test]
    fn test_elevation_skips_unknown() {
        let mut points = vec![
            Point::new(45.0, 7.0).with_elevation(100.0),
            Point::new(45.0, 7.0),
            Point::new(45.0, 7.0).with_elevation(100.0),
        ];
        smooth_elevation_range(&mut points, 0, 3, 1, 1.0);
        assert_eq!(points[1].elevation, None);
        assert!((points[0].elevation.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_smooth_document() {
        let mut points: Vec<Point> = (0..5).map(|_| Point::new(45.0, 7.0)).collect();
        points[2].longitude = 7.01;
        let mut doc = Document::new("", vec![Track::from_segments(vec![points])]);
        let moved = smooth_document_positions(&mut doc, &SmoothingOptions::default());
        assert_eq!(moved, 3);
    }
}
