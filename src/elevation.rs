//! Elevation filling and reconciliation against a reference source.
//!
//! ## Reference lookups
//! The reference dataset (a terrain model such as SRTM) is reached through
//! the [`ElevationSource`] trait. Lookups may fail; failures only skip the
//! affected point. [`RetryingSource`] adds bounded retries with exponential
//! backoff and [`CachedSource`] memoises answers by rounded coordinates.
//!
//! ## Tolerance bands
//! The reference gets less accurate in rugged, high terrain, so the
//! tolerance grows with the reference elevation:
//!
//! | Reference elevation | Tolerance | Wide tolerance |
//! |---|---|---|
//! | < 500 m | 5 % | 15 % |
//! | < 1000 m | 7 % | 20 % |
//! | < 2000 m | 9 % | 25 % |
//! | >= 2000 m | 12 % | 30 % |
//!
//! Differences of 10 m or less are within the dataset's resolution and
//! never count.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{FillElevationOptions, Overwrite, ReconcileOptions};
use crate::error::{OptionExt, Result};
use crate::lru_cache::{CacheStats, CoordKey, LruCache};
use crate::{Document, Finding};

// ============================================================================
// Reference source contract
// ============================================================================

/// Answer of a reference elevation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ElevationLookup {
    /// Elevation in meters
    Found(f64),
    /// The dataset has no value here (e.g. a void or outside coverage)
    NotFound,
    /// The source could not answer (network, timeout)
    Unavailable,
}

/// A reference elevation dataset.
pub trait ElevationSource: Send + Sync {
    fn lookup(&self, latitude: f64, longitude: f64) -> ElevationLookup;
}

impl<S: ElevationSource + ?Sized> ElevationSource for Arc<S> {
    fn lookup(&self, latitude: f64, longitude: f64) -> ElevationLookup {
        (**self).lookup(latitude, longitude)
    }
}

impl<S: ElevationSource + ?Sized> ElevationSource for Box<S> {
    fn lookup(&self, latitude: f64, longitude: f64) -> ElevationLookup {
        (**self).lookup(latitude, longitude)
    }
}

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 500;

/// Retries `Unavailable` answers with exponential backoff.
///
/// `NotFound` is an answer, not a failure, and is never retried.
pub struct RetryingSource<S> {
    inner: S,
    max_retries: u32,
    base_backoff: Duration,
}

impl<S: ElevationSource> RetryingSource<S> {
    /// Three retries starting at 500 ms.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_retries: MAX_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }

    pub fn with_policy(inner: S, max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_backoff,
        }
    }
}

impl<S: ElevationSource> ElevationSource for RetryingSource<S> {
    fn lookup(&self, latitude: f64, longitude: f64) -> ElevationLookup {
        let mut retries = 0;
        loop {
            match self.inner.lookup(latitude, longitude) {
                ElevationLookup::Unavailable if retries < self.max_retries => {
                    let backoff = self.base_backoff * (1 << retries);
                    debug!(
                        "[RetryingSource] Unavailable at ({:.5}, {:.5}), retry {} in {:?}",
                        latitude,
                        longitude,
                        retries + 1,
                        backoff
                    );
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                    retries += 1;
                }
                answer => return answer,
            }
        }
    }
}

/// Memoises lookups by coordinates rounded to five decimals.
///
/// `Unavailable` answers are not cached so that a later call can retry.
pub struct CachedSource<S> {
    inner: S,
    cache: Mutex<LruCache<ElevationLookup>>,
}

impl<S: ElevationSource> CachedSource<S> {
    const DECIMALS: u32 = 5;

    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.cache
            .lock()
            .map(|cache| cache.stats())
            .unwrap_or_default()
    }
}

impl<S: ElevationSource> ElevationSource for CachedSource<S> {
    fn lookup(&self, latitude: f64, longitude: f64) -> ElevationLookup {
        let key = CoordKey::new(latitude, longitude, Self::DECIMALS);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(answer) = cache.get(&key) {
                return answer;
            }
        }
        let answer = self.inner.lookup(latitude, longitude);
        if answer != ElevationLookup::Unavailable {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(key, answer);
            }
        }
        answer
    }
}

// ============================================================================
// Missing elevation
// ============================================================================

/// Fill missing elevations from the nearest known neighbour.
///
/// Searches up to `window` points forward, then up to `window` points
/// backward, over the original elevations. Points with no known neighbour
/// in range stay unknown.
pub fn fill_missing_elevation(
    doc: &mut Document,
    options: &FillElevationOptions,
    fix: bool,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (t, track) in doc.tracks.iter_mut().enumerate() {
        for s in 0..track.segment_count() {
            let original: Vec<Option<f64>> =
                track.segment(s).iter().map(|p| p.elevation).collect();
            let n = original.len();
            let mut fills = Vec::new();

            for i in (0..n).filter(|&i| original[i].is_none()) {
                let forward = ((i + 1)..n.min(i + 1 + options.window)).find_map(|j| original[j]);
                let found = forward.or_else(|| {
                    (i.saturating_sub(options.window)..i)
                        .rev()
                        .find_map(|j| original[j])
                });
                if let Some(elevation) = found {
                    fills.push((i, elevation));
                }
            }

            let segment = track.segment_mut(s);
            for (i, elevation) in fills {
                findings.push(Finding {
                    elevation,
                    ..Finding::at(t, s, i, segment[i])
                });
                if fix {
                    segment[i].elevation = Some(elevation);
                }
            }
        }
    }
    debug!("[FillElevation] {} findings (fix: {})", findings.len(), fix);
    findings
}

// ============================================================================
// Reference reconciliation
// ============================================================================

/// Distance (meters) within the reference dataset's own resolution.
const RESOLUTION_METERS: f64 = 10.0;

/// Violations charged for a point with no device elevation.
const MISSING_ELEVATION_VIOLATIONS: usize = 5;

/// (percentage, wide percentage) tolerance for a reference elevation.
fn tolerance_band(reference: f64) -> (f64, f64) {
    if reference < 500.0 {
        (5.0, 15.0)
    } else if reference < 1000.0 {
        (7.0, 20.0)
    } else if reference < 2000.0 {
        (9.0, 25.0)
    } else {
        (12.0, 30.0)
    }
}

/// Violations for one device/reference pair.
fn violations(device: Option<f64>, reference: f64) -> usize {
    let Some(device) = device else {
        return MISSING_ELEVATION_VIOLATIONS;
    };
    let diff = (device - reference).abs();
    if diff <= RESOLUTION_METERS {
        return 0;
    }
    let percent = if device == 0.0 {
        f64::INFINITY
    } else {
        diff * 100.0 / device.abs()
    };
    let (tolerance, wide) = tolerance_band(reference);
    let mut count = 0;
    if percent > tolerance {
        count += 1;
        if percent > wide {
            count += 4;
        }
    }
    count
}

/// Outcome of [`reconcile_with_reference`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Share of agreement from 0 to 100
    pub accuracy: f64,
    /// Points the reference answered for
    pub sampled: usize,
    pub violations: usize,
    /// Points replaced with the reference value
    pub overwritten: usize,
    /// One finding per violating point, carrying the reference elevation
    pub findings: Vec<Finding>,
}

/// Compare device elevation with the reference and optionally overwrite.
///
/// Points without a usable position or without a reference answer are not
/// sampled. Fails with `ElevationUnavailable` when nothing could be sampled.
pub fn reconcile_with_reference(
    doc: &mut Document,
    source: &dyn ElevationSource,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let mut unavailable = 0usize;
    let mut writes: Vec<(usize, usize, f64)> = Vec::new();

    for (t, track) in doc.tracks.iter().enumerate() {
        let mut offset = 0;
        for (s, segment) in track.segments().enumerate() {
            for (i, point) in segment.iter().enumerate() {
                if !point.has_position() {
                    continue;
                }
                let reference = match source.lookup(point.latitude, point.longitude) {
                    ElevationLookup::Found(e) => e,
                    ElevationLookup::NotFound => continue,
                    ElevationLookup::Unavailable => {
                        unavailable += 1;
                        continue;
                    }
                };
                report.sampled += 1;
                let v = violations(point.elevation, reference);
                report.violations += v;
                if v > 0 {
                    report.findings.push(Finding {
                        elevation: reference,
                        count: v,
                        ..Finding::at(t, s, i, *point)
                    });
                }
                let overwrite = match options.overwrite {
                    Overwrite::Never => false,
                    Overwrite::Violations => v > 0,
                    Overwrite::All => true,
                };
                if overwrite {
                    writes.push((t, offset + i, reference));
                }
            }
            offset += segment.len();
        }
    }

    if unavailable > 0 {
        warn!(
            "[Reconcile] Reference unavailable for {} point(s), skipped",
            unavailable
        );
    }
    let sampled = (report.sampled > 0)
        .then_some(report.sampled)
        .ok_or_elevation_unavailable("no point could be sampled")?;

    report.accuracy = (100.0 - report.violations as f64 * 100.0 / sampled as f64).max(0.0);
    report.overwritten = writes.len();
    for (t, index, reference) in writes {
        doc.tracks[t].points_mut()[index].elevation = Some(reference);
    }

    info!(
        "[Reconcile] Accuracy {:.1}% over {} points, {} overwritten",
        report.accuracy, sampled, report.overwritten
    );
    Ok(report)
}

// ============================================================================
// Frozen elevation runs
// ============================================================================

/// Report runs of more than `min_run` identical consecutive elevations.
///
/// A barometer that stops updating produces such runs. With `fix` and a
/// source, run points are replaced by reference values where available.
pub fn flat_elevation_runs(
    doc: &mut Document,
    min_run: usize,
    source: Option<&dyn ElevationSource>,
    fix: bool,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (t, track) in doc.tracks.iter_mut().enumerate() {
        for s in 0..track.segment_count() {
            let segment = track.segment_mut(s);
            let n = segment.len();
            let mut start = 0;
            while start < n {
                let mut end = start + 1;
                while end < n
                    && segment[start].elevation.is_some()
                    && segment[end].elevation == segment[start].elevation
                {
                    end += 1;
                }
                let run = end - start;
                if segment[start].elevation.is_some() && run > min_run {
                    findings.push(Finding {
                        elevation: segment[start].elevation.unwrap_or_default(),
                        ..Finding::at(t, s, start, segment[start]).with_count(run)
                    });
                    if let (true, Some(source)) = (fix, source) {
                        for point in &mut segment[start..end] {
                            if let ElevationLookup::Found(e) =
                                source.lookup(point.latitude, point.longitude)
                            {
                                point.elevation = Some(e);
                            }
                        }
                    }
                }
                start = end;
            }
        }
    }
    debug!("[FlatElevation] {} runs (fix: {})", findings.len(), fix);
    findings
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::TrackError;
    use crate::{Point, Track};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reference that answers a constant elevation.
    pub(crate) struct FlatSource(pub f64);

    impl ElevationSource for FlatSource {
        fn lookup(&self, _: f64, _: f64) -> ElevationLookup {
            ElevationLookup::Found(self.0)
        }
    }

    /// Reference that is down for the first `failures` calls.
    struct FlakySource {
        calls: AtomicUsize,
        failures: usize,
    }

    impl ElevationSource for FlakySource {
        fn lookup(&self, _: f64, _: f64) -> ElevationLookup {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                ElevationLookup::Unavailable
            } else {
                ElevationLookup::Found(100.0)
            }
        }
    }

    struct DownSource;

    impl ElevationSource for DownSource {
        fn lookup(&self, _: f64, _: f64) -> ElevationLookup {
            ElevationLookup::Unavailable
        }
    }

    fn doc_with_elevations(elevations: &[Option<f64>]) -> Document {
        let points = elevations
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let p = Point::new(45.0 + i as f64 * 0.0001, 7.0);
                match e {
                    Some(e) => p.with_elevation(*e),
                    None => p,
                }
            })
            .collect();
        Document::new("", vec![Track::from_segments(vec![points])])
    }

    #[test]
    fn test_fill_missing_elevation() {
        let mut doc = doc_with_elevations(&[None, None, Some(120.0), None, None]);
        let options = FillElevationOptions { window: 5 };
        let findings = fill_missing_elevation(&mut doc, &options, true);
        assert_eq!(findings.len(), 4);
        assert!(doc.points().all(|p| p.elevation == Some(120.0)));
    }

    #[test]
    fn test_fill_respects_window() {
        let mut elevations = vec![None; 15];
        elevations[14] = Some(50.0);
        let mut doc = doc_with_elevations(&elevations);
        let findings =
            fill_missing_elevation(&mut doc, &FillElevationOptions::default(), true);
        // only points within 10 of index 14 can be filled
        assert_eq!(findings.len(), 10);
        assert_eq!(doc.tracks[0].segment(0)[3].elevation, None);
        assert_eq!(doc.tracks[0].segment(0)[4].elevation, Some(50.0));
    }

    #[test]
    fn test_fill_dry_run() {
        let mut doc = doc_with_elevations(&[None, Some(10.0)]);
        let before = doc.clone();
        assert_eq!(
            fill_missing_elevation(&mut doc, &FillElevationOptions::default(), false).len(),
            1
        );
        assert_eq!(doc, before);
    }

    #[test]
    fn test_violation_bands() {
        assert_eq!(violations(Some(100.0), 108.0), 0); // within 10 m
        assert_eq!(violations(Some(100.0), 112.0), 1); // 12% > 5%
        assert_eq!(violations(Some(100.0), 120.0), 5); // 20% > 15%
        assert_eq!(violations(Some(1500.0), 1600.0), 0); // 6.7% < 9%
        assert_eq!(violations(Some(2500.0), 2800.0), 0); // 12% is not above 12%
        assert_eq!(violations(Some(2500.0), 2900.0), 1); // 16%
        assert_eq!(violations(None, 300.0), 5);
    }

    #[test]
    fn test_reconcile_accuracy_bounds() {
        let mut doc = doc_with_elevations(&[Some(100.0), Some(100.0), Some(100.0), Some(100.0)]);
        let report =
            reconcile_with_reference(&mut doc, &FlatSource(105.0), &ReconcileOptions::default())
                .unwrap();
        assert_eq!(report.accuracy, 100.0);
        assert_eq!(report.sampled, 4);
        assert!(report.findings.is_empty());

        let mut doc = doc_with_elevations(&[None, None, Some(100.0), Some(100.0)]);
        let report =
            reconcile_with_reference(&mut doc, &FlatSource(300.0), &ReconcileOptions::default())
                .unwrap();
        assert_eq!(report.accuracy, 0.0);
        assert!((0.0..=100.0).contains(&report.accuracy));
    }

    #[test]
    fn test_reconcile_overwrite_policies() {
        let mut doc = doc_with_elevations(&[Some(100.0), Some(200.0)]);
        let options = ReconcileOptions {
            overwrite: Overwrite::Violations,
        };
        let report = reconcile_with_reference(&mut doc, &FlatSource(105.0), &options).unwrap();
        assert_eq!(report.overwritten, 1);
        assert_eq!(report.violations, 5);
        assert_eq!(report.accuracy, 0.0);
        let elevations: Vec<Option<f64>> = doc.points().map(|p| p.elevation).collect();
        assert_eq!(elevations, vec![Some(100.0), Some(105.0)]);

        let options = ReconcileOptions {
            overwrite: Overwrite::All,
        };
        let report = reconcile_with_reference(&mut doc, &FlatSource(90.0), &options).unwrap();
        assert_eq!(report.overwritten, 2);
        assert!(doc.points().all(|p| p.elevation == Some(90.0)));
    }

    #[test]
    fn test_reconcile_unavailable() {
        let mut doc = doc_with_elevations(&[Some(100.0)]);
        let err = reconcile_with_reference(&mut doc, &DownSource, &ReconcileOptions::default())
            .unwrap_err();
        assert!(matches!(err, TrackError::ElevationUnavailable { .. }));
    }

    #[test]
    fn test_retrying_source() {
        let flaky = FlakySource {
            calls: AtomicUsize::new(0),
            failures: 2,
        };
        let source = RetryingSource::with_policy(flaky, 3, Duration::ZERO);
        assert_eq!(source.lookup(45.0, 7.0), ElevationLookup::Found(100.0));

        let source = RetryingSource::with_policy(DownSource, 2, Duration::ZERO);
        assert_eq!(source.lookup(45.0, 7.0), ElevationLookup::Unavailable);
    }

    #[test]
    fn test_cached_source() {
        let flaky = FlakySource {
            calls: AtomicUsize::new(0),
            failures: 1,
        };
        let source = CachedSource::new(flaky, 16);
        assert_eq!(source.lookup(45.0, 7.0), ElevationLookup::Unavailable);
        assert_eq!(source.lookup(45.0, 7.0), ElevationLookup::Found(100.0));
        assert_eq!(source.lookup(45.000_001, 7.0), ElevationLookup::Found(100.0));
        let stats = source.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_flat_elevation_runs() {
        let mut elevations = vec![Some(300.0); 12];
        elevations.extend((0..5).map(|i| Some(301.0 + i as f64)));
        let mut doc = doc_with_elevations(&elevations);
        let findings = flat_elevation_runs(&mut doc, 10, Some(&FlatSource(280.0)), true);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].count, 12);
        let segment = doc.tracks[0].segment(0);
        assert_eq!(segment[0].elevation, Some(280.0));
        assert_eq!(segment[12].elevation, Some(301.0));

        let mut doc = doc_with_elevations(&[Some(300.0); 5]);
        assert!(flat_elevation_runs(&mut doc, 10, None, false).is_empty());
    }
}
