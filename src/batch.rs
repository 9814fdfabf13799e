//! # Batch Processing
//!
//! Repair, score and classify many recordings, then detect duplicates.
//!
//! Recordings are independent, so with the `parallel` feature they are
//! processed with rayon. Duplicate detection is order dependent
//! (first-seen-wins) and always runs afterwards, sequentially, in input
//! order.
//!
//! Collaborator failures (elevation, geocoding) only degrade the affected
//! recording; they never abort the batch.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::classify::{classify_with_cancel, Classification};
use crate::config::RepairConfig;
use crate::duplicates::{DuplicateCandidate, DuplicateDetector, DuplicateMatch};
use crate::elevation::ElevationSource;
use crate::error::{Result, TrackError};
use crate::metadata::{creator_label, location_start, Address, Geocoder, TimezoneLookup};
use crate::pipeline::{CancelToken, Pipeline};
use crate::quality::{score_track, QualityReport};
use crate::Document;

/// A recording and the id it is reported under.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub document: Document,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, document: Document) -> Self {
        Self {
            id: id.into(),
            document,
        }
    }
}

/// External collaborators shared by every recording of a batch.
#[derive(Clone, Default)]
pub struct Services {
    pub elevation: Option<Arc<dyn ElevationSource>>,
    pub timezones: Option<Arc<dyn TimezoneLookup>>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
}

/// Result for one processed recording.
#[derive(Debug, Clone)]
pub struct TrackSummary {
    pub id: String,
    /// The repaired document
    pub document: Document,
    /// Findings and corrections over all passes
    pub changes: usize,
    pub quality: QualityReport,
    pub classification: Classification,
    pub creator: String,
    /// Start location, when a geocoder is available and answered
    pub location: Option<Address>,
}

/// Result of [`process_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Processed recordings in input order
    pub summaries: Vec<TrackSummary>,
    pub duplicates: Vec<DuplicateMatch>,
    /// Ids whose duplicate verdict allows removal
    pub removed: Vec<String>,
    /// Ids skipped because they were empty or cancelled
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

struct Processed {
    summary: TrackSummary,
    candidate: Option<DuplicateCandidate>,
}

fn process_item(
    item: BatchItem,
    config: &RepairConfig,
    pipeline: &Pipeline,
    services: &Services,
    cancel: &CancelToken,
) -> Result<Processed> {
    let BatchItem { id, mut document } = item;
    if document.is_empty() {
        return Err(TrackError::EmptyDocument);
    }
    let source = services.elevation.as_deref();
    let zones = services.timezones.as_deref();

    let report = pipeline.run(&mut document, true, source, cancel)?;
    let quality = score_track(&document, source);
    let classification = classify_with_cancel(&document, source, &config.classifier, cancel)?;

    let location = services
        .geocoder
        .as_deref()
        .and_then(|geocoder| match location_start(&document, geocoder) {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("[Batch] {}: no location: {}", id, e);
                None
            }
        });

    let candidate = DuplicateCandidate::from_document(id.clone(), &document, quality.score, zones);
    if candidate.is_none() {
        debug!("[Batch] {}: no start/end, excluded from duplicate detection", id);
    }

    Ok(Processed {
        summary: TrackSummary {
            creator: creator_label(&document.creator),
            id,
            document,
            changes: report.total(),
            quality,
            classification,
            location,
        },
        candidate,
    })
}

/// Process a batch of recordings.
///
/// The configuration (and duplicate rules, when present) is validated
/// before any recording is touched. Empty recordings are skipped; a
/// cancellation skips the recordings it interrupts and marks the report
/// as cancelled.
pub fn process_batch(
    items: Vec<BatchItem>,
    config: &RepairConfig,
    services: &Services,
    cancel: &CancelToken,
) -> Result<BatchReport> {
    config.validate()?;
    let mut detector = config
        .duplicates
        .clone()
        .map(DuplicateDetector::new)
        .transpose()?;
    let pipeline = config.pipeline();

    info!("[Batch] Processing {} recordings", items.len());
    let start = Instant::now();
    let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();

    #[cfg(feature = "parallel")]
    let outcomes: Vec<Result<Processed>> = {
        use rayon::prelude::*;
        items
            .into_par_iter()
            .map(|item| process_item(item, config, &pipeline, services, cancel))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<Result<Processed>> = items
        .into_iter()
        .map(|item| process_item(item, config, &pipeline, services, cancel))
        .collect();

    let mut report = BatchReport::default();
    for (id, outcome) in ids.into_iter().zip(outcomes) {
        match outcome {
            Ok(processed) => {
                if let (Some(detector), Some(candidate)) = (detector.as_mut(), processed.candidate)
                {
                    let matches = detector.check(candidate);
                    if matches.iter().any(|m| m.remove) {
                        report.removed.push(id.clone());
                    }
                    report.duplicates.extend(matches);
                }
                report.summaries.push(processed.summary);
            }
            Err(TrackError::Cancelled { completed_passes }) => {
                debug!("[Batch] {} cancelled after {} passes", id, completed_passes);
                report.cancelled = true;
                report.skipped.push(id);
            }
            Err(e) => {
                warn!("[Batch] {} skipped: {}", id, e);
                report.skipped.push(id);
            }
        }
    }

    info!(
        "[Batch] {} processed, {} skipped, {} duplicates in {:?}",
        report.summaries.len(),
        report.skipped.len(),
        report.duplicates.len(),
        start.elapsed()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicateRules;
    use crate::elevation::tests::FlatSource;
    use crate::geo_utils::ONE_DEGREE;
    use crate::{ActivityKind, Point, Track};
    use chrono::{Duration, TimeZone, Utc};

    fn ride(offset_seconds: i64) -> Document {
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap()
            + Duration::seconds(offset_seconds);
        let points = (0..120)
            .map(|i| {
                Point::new(46.0 + i as f64 * 5.0 / ONE_DEGREE, 7.0)
                    .with_elevation(450.0)
                    .with_time(start + Duration::seconds(i))
            })
            .collect();
        Document::new("Garmin Edge 530", vec![Track::from_segments(vec![points])])
    }

    fn config_with_rules(rules: DuplicateRules) -> RepairConfig {
        RepairConfig {
            duplicates: Some(rules),
            ..RepairConfig::default()
        }
    }

    #[test]
    fn test_batch_summaries_in_order() {
        let items = vec![
            BatchItem::new("first", ride(0)),
            BatchItem::new("empty", Document::default()),
            BatchItem::new("second", ride(7200)),
        ];
        let services = Services {
            elevation: Some(Arc::new(FlatSource(450.0))),
            ..Services::default()
        };
        let report =
            process_batch(items, &RepairConfig::default(), &services, &CancelToken::new())
                .unwrap();
        let ids: Vec<&str> = report.summaries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
        assert_eq!(report.skipped, vec!["empty".to_string()]);
        assert!(!report.cancelled);

        let summary = &report.summaries[0];
        assert_eq!(summary.creator, "Garmin");
        assert_eq!(summary.classification.kind, ActivityKind::CyclingTransport);
        assert_eq!(summary.quality.elevation, 100.0);
        assert_eq!(summary.quality.score, 100.0);
    }

    #[test]
    fn test_batch_duplicates() {
        let rules = DuplicateRules {
            start_seconds: 10.0,
            remove_duplicates: true,
            ..DuplicateRules::default()
        };
        let items = vec![
            BatchItem::new("a", ride(0)),
            BatchItem::new("b", ride(8)),
            BatchItem::new("c", ride(3600)),
        ];
        let report = process_batch(
            items,
            &config_with_rules(rules),
            &Services::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].source_id, "b");
        assert_eq!(report.duplicates[0].duplicate_of, "a");
        assert_eq!(report.removed, vec!["b".to_string()]);
    }

    #[test]
    fn test_invalid_rules_rejected_up_front() {
        let result = process_batch(
            vec![BatchItem::new("a", ride(0))],
            &config_with_rules(DuplicateRules::default()),
            &Services::default(),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(TrackError::NoRuleEnabled)));
    }

    #[test]
    fn test_cancelled_batch() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = process_batch(
            vec![BatchItem::new("a", ride(0))],
            &RepairConfig::default(),
            &Services::default(),
            &cancel,
        )
        .unwrap();
        assert!(report.cancelled);
        assert!(report.summaries.is_empty());
        assert_eq!(report.skipped, vec!["a".to_string()]);
    }
}
