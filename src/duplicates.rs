//! # Duplicate Detection
//!
//! Finds recordings of the same outing across a batch.
//!
//! Each recording is reduced to a [`DuplicateCandidate`]: its start and end
//! time and position. Two independent rule sets compare a new candidate
//! with every earlier unmatched one:
//! - **Time** - start times within `start_seconds`, reported as a
//!   start+end match when `require_end_time` is set and end times are
//!   within `end_seconds` too
//! - **Position** - start positions within `start_meters`, reported as a
//!   start+end match when `require_end_position` is set and end positions
//!   are within `end_meters` too
//!
//! A rule set with a zero start tolerance falls back to its end tolerance
//! alone. Comparison is first-seen-wins, so results depend on input order.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::DuplicateRules;
use crate::error::Result;
use crate::geo_utils::haversine_points;
use crate::metadata::{
    creator_label, end_position, end_time, start_position, start_time, TimezoneLookup,
};
use crate::{Document, Point};

/// Start and end of a recording, as compared by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub source_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_position: Point,
    pub end_position: Point,
    /// Quality score, compared exactly by the removal policy
    pub quality: f64,
    /// Canonical creator label
    pub creator: String,
}

impl DuplicateCandidate {
    /// Extract a candidate from a document.
    ///
    /// Returns `None` when the document lacks a plausible start or end time
    /// or a usable start or end position.
    pub fn from_document(
        source_id: impl Into<String>,
        doc: &Document,
        quality: f64,
        zones: Option<&dyn TimezoneLookup>,
    ) -> Option<Self> {
        Some(Self {
            source_id: source_id.into(),
            start_time: start_time(doc, zones)?,
            end_time: end_time(doc, zones)?,
            start_position: start_position(doc)?,
            end_position: end_position(doc)?,
            quality,
            creator: creator_label(&doc.creator),
        })
    }
}

/// Which rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    StartTime,
    StartEndTime,
    EndTime,
    StartPosition,
    StartEndPosition,
    EndPosition,
}

/// A confirmed duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    /// The new recording
    pub source_id: String,
    /// The earlier recording it duplicates
    pub duplicate_of: String,
    pub kind: DuplicateKind,
    /// True when the removal policy applies: removal is enabled and both
    /// recordings share creator label and quality score
    pub remove: bool,
}

fn seconds_apart(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    ((a - b).num_milliseconds() as f64 / 1000.0).abs()
}

/// Two-tier rule: a start match, upgraded to a start+end match when the
/// end check is required and passes, or the end check alone when the start
/// tolerance is zero.
fn two_tier(
    start_tolerance: f64,
    end_tolerance: f64,
    require_end: bool,
    start_distance: f64,
    end_distance: f64,
    kinds: (DuplicateKind, DuplicateKind, DuplicateKind),
) -> Option<DuplicateKind> {
    let (start_kind, both_kind, end_kind) = kinds;
    if start_tolerance > 0.0 {
        if start_distance >= start_tolerance {
            return None;
        }
        if require_end && end_tolerance > 0.0 && end_distance < end_tolerance {
            return Some(both_kind);
        }
        return Some(start_kind);
    }
    if end_tolerance > 0.0 && end_distance < end_tolerance {
        return Some(end_kind);
    }
    None
}

/// Accumulates candidates in input order and checks each new one.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    rules: DuplicateRules,
    candidates: Vec<DuplicateCandidate>,
}

impl DuplicateDetector {
    /// Create a detector; fails when the rules are unusable.
    pub fn new(rules: DuplicateRules) -> Result<Self> {
        rules.validate()?;
        Ok(Self {
            rules,
            candidates: Vec::new(),
        })
    }

    /// Earlier recordings that matched nothing.
    pub fn candidates(&self) -> &[DuplicateCandidate] {
        &self.candidates
    }

    fn time_match(
        &self,
        new: &DuplicateCandidate,
        old: &DuplicateCandidate,
    ) -> Option<DuplicateKind> {
        two_tier(
            self.rules.start_seconds,
            self.rules.end_seconds,
            self.rules.require_end_time,
            seconds_apart(new.start_time, old.start_time),
            seconds_apart(new.end_time, old.end_time),
            (
                DuplicateKind::StartTime,
                DuplicateKind::StartEndTime,
                DuplicateKind::EndTime,
            ),
        )
    }

    fn position_match(
        &self,
        new: &DuplicateCandidate,
        old: &DuplicateCandidate,
    ) -> Option<DuplicateKind> {
        two_tier(
            self.rules.start_meters,
            self.rules.end_meters,
            self.rules.require_end_position,
            haversine_points(&new.start_position, &old.start_position),
            haversine_points(&new.end_position, &old.end_position),
            (
                DuplicateKind::StartPosition,
                DuplicateKind::StartEndPosition,
                DuplicateKind::EndPosition,
            ),
        )
    }

    fn verdict(
        &self,
        new: &DuplicateCandidate,
        old: &DuplicateCandidate,
        kind: DuplicateKind,
    ) -> DuplicateMatch {
        DuplicateMatch {
            source_id: new.source_id.clone(),
            duplicate_of: old.source_id.clone(),
            kind,
            remove: self.rules.remove_duplicates
                && new.creator == old.creator
                && new.quality == old.quality,
        }
    }

    /// Compare a candidate with every earlier unmatched candidate.
    ///
    /// Each enabled rule set reports its first match. A candidate that
    /// matches nothing is kept for comparison with later ones.
    pub fn check(&mut self, candidate: DuplicateCandidate) -> Vec<DuplicateMatch> {
        let mut matches = Vec::new();

        if self.rules.time_enabled() {
            let found = self
                .candidates
                .iter()
                .find_map(|old| self.time_match(&candidate, old).map(|kind| (old, kind)));
            if let Some((old, kind)) = found {
                matches.push(self.verdict(&candidate, old, kind));
            }
        }
        if self.rules.position_enabled() {
            let found = self
                .candidates
                .iter()
                .find_map(|old| self.position_match(&candidate, old).map(|kind| (old, kind)));
            if let Some((old, kind)) = found {
                matches.push(self.verdict(&candidate, old, kind));
            }
        }

        for m in &matches {
            info!(
                "[Duplicates] {} duplicates {} ({:?}, remove: {})",
                m.source_id, m.duplicate_of, m.kind, m.remove
            );
        }
        if matches.is_empty() {
            debug!("[Duplicates] {} is new", candidate.source_id);
            self.candidates.push(candidate);
        }
        matches
    }
}
