//! Change matcher.
//!
//! Compares building detections from an earlier and a recent image of the same
//! area. Boxes are paired greedily by IOU in recent-detection order:
//!
//! 1. Each recent detection takes the unmatched earlier detection with the
//!    highest IOU (first one wins on ties), provided it beats `iou_threshold`.
//! 2. A pair whose relative area delta exceeds `area_change_threshold` is
//!    reported as `Extended` or `Shrunk`; otherwise it is unchanged and only
//!    consumed.
//! 3. Leftover recent detections are new buildings, leftover earlier
//!    detections are demolished buildings.
//!
//! An earlier detection consumed by one recent detection is never reconsidered,
//! so the result depends on input order and is not a globally optimal
//! assignment.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::{Detection, DetectionSet};
use crate::geometry::{ImageSize, Point};

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.3;
pub const DEFAULT_AREA_CHANGE_THRESHOLD: f64 = 0.3;

/// Thresholds for one comparison.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchParams {
    /// Minimum IOU (exclusive) for two boxes to be the same building.
    pub iou_threshold: f64,
    /// Minimum relative area delta (exclusive) to report a size change.
    pub area_change_threshold: f64,
    /// When set, candidates whose centers are this far apart or more are ignored.
    pub max_center_distance: Option<f64>,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            area_change_threshold: DEFAULT_AREA_CHANGE_THRESHOLD,
            max_center_distance: None,
        }
    }
}

impl MatchParams {
    pub fn new(iou_threshold: f64, area_change_threshold: f64) -> Self {
        Self {
            iou_threshold,
            area_change_threshold,
            max_center_distance: None,
        }
    }

    pub fn with_max_center_distance(mut self, distance: f64) -> Self {
        self.max_center_distance = Some(distance);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_unit("iou_threshold", self.iou_threshold)?;
        validate_unit("area_change_threshold", self.area_change_threshold)?;
        if let Some(distance) = self.max_center_distance {
            if !distance.is_finite() || distance < 0.0 {
                return Err(anyhow!(
                    "max_center_distance must be a non-negative number, got {}",
                    distance
                ));
            }
        }
        Ok(())
    }
}

fn validate_unit(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    NewBuilding,
    DemolishedBuilding,
    Extended,
    Shrunk,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::NewBuilding => "new_building",
            ChangeKind::DemolishedBuilding => "demolished_building",
            ChangeKind::Extended => "extended",
            ChangeKind::Shrunk => "shrunk",
        }
    }
}

/// One detected change between the two images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    /// Center of the recent detection, or of the earlier one for demolitions.
    pub position: Point,
    /// Area of the detection `position` refers to.
    pub area: f64,
    /// Confidence of that detection.
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earlier_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_index: Option<usize>,
    /// Size delta, present on `Extended` / `Shrunk` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<AreaChange>,
}

impl ChangeRecord {
    fn new_building(index: usize, detection: &Detection) -> Self {
        Self {
            kind: ChangeKind::NewBuilding,
            position: detection.center(),
            area: detection.area(),
            confidence: detection.confidence,
            earlier_index: None,
            recent_index: Some(index),
            resize: None,
        }
    }

    fn demolished(index: usize, detection: &Detection) -> Self {
        Self {
            kind: ChangeKind::DemolishedBuilding,
            position: detection.center(),
            area: detection.area(),
            confidence: detection.confidence,
            earlier_index: Some(index),
            recent_index: None,
            resize: None,
        }
    }

    /// Pixel area this record contributes to the total change area.
    pub fn changed_area(&self) -> f64 {
        match &self.resize {
            Some(resize) => resize.delta.abs(),
            None => self.area,
        }
    }
}

/// Before/after geometry of a matched pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AreaChange {
    pub area_before: f64,
    pub area_after: f64,
    /// `area_after - area_before`.
    pub delta: f64,
    /// `|delta| / area_before`.
    pub ratio: f64,
    /// Distance between the two centers.
    pub position_offset: f64,
}

impl AreaChange {
    fn between(earlier: &Detection, recent: &Detection) -> Self {
        let area_before = earlier.area();
        let area_after = recent.area();
        let delta = area_after - area_before;
        Self {
            area_before,
            area_after,
            delta,
            ratio: change_ratio(area_before, area_after),
            position_offset: recent.center().distance(&earlier.center()),
        }
    }
}

/// Relative area change. A zero-area earlier box counts as a full extension
/// when the recent box has any area.
fn change_ratio(area_before: f64, area_after: f64) -> f64 {
    if area_before > 0.0 {
        (area_after - area_before).abs() / area_before
    } else if area_after > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// A recent/earlier pair judged to be the same building.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub earlier_index: usize,
    pub recent_index: usize,
    pub iou: f64,
    /// False when the pair produced no change record.
    pub changed: bool,
}

/// Headline classification of a comparison, used for history filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DominantChange {
    NoChange,
    NewBuildings,
    Demolition,
    Extension,
    Shrinkage,
    Mixed,
}

impl DominantChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            DominantChange::NoChange => "no_change",
            DominantChange::NewBuildings => "new_buildings",
            DominantChange::Demolition => "demolition",
            DominantChange::Extension => "extension",
            DominantChange::Shrinkage => "shrinkage",
            DominantChange::Mixed => "mixed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "no_change" => Ok(DominantChange::NoChange),
            "new_buildings" => Ok(DominantChange::NewBuildings),
            "demolition" => Ok(DominantChange::Demolition),
            "extension" => Ok(DominantChange::Extension),
            "shrinkage" => Ok(DominantChange::Shrinkage),
            "mixed" => Ok(DominantChange::Mixed),
            other => Err(anyhow!("unknown change type '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub new_buildings: usize,
    pub demolished_buildings: usize,
    pub extended: usize,
    pub shrunk: usize,
    /// All matched pairs, unchanged ones included.
    pub matched_pairs: usize,
    /// New + demolished areas plus absolute resize deltas, in square pixels.
    pub total_change_area: f64,
    /// `total_change_area` as a percentage of the frame, clamped to [0, 100].
    pub change_rate: f64,
}

impl ChangeSummary {
    fn from_records(records: &[ChangeRecord], matched_pairs: usize, frame: ImageSize) -> Self {
        let mut summary = Self {
            matched_pairs,
            ..Self::default()
        };
        for record in records {
            match record.kind {
                ChangeKind::NewBuilding => summary.new_buildings += 1,
                ChangeKind::DemolishedBuilding => summary.demolished_buildings += 1,
                ChangeKind::Extended => summary.extended += 1,
                ChangeKind::Shrunk => summary.shrunk += 1,
            }
            summary.total_change_area += record.changed_area();
        }
        let frame_area = frame.area();
        summary.change_rate = if frame_area > 0.0 {
            (summary.total_change_area / frame_area * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        summary
    }

    pub fn total_changes(&self) -> usize {
        self.new_buildings + self.demolished_buildings + self.extended + self.shrunk
    }

    /// Matched pairs without a reportable size change. Saturates for
    /// summaries deserialized from inconsistent reports.
    pub fn unchanged_pairs(&self) -> usize {
        self.matched_pairs
            .saturating_sub(self.extended)
            .saturating_sub(self.shrunk)
    }

    pub fn dominant_change(&self) -> DominantChange {
        let present = [
            (self.new_buildings, DominantChange::NewBuildings),
            (self.demolished_buildings, DominantChange::Demolition),
            (self.extended, DominantChange::Extension),
            (self.shrunk, DominantChange::Shrinkage),
        ];
        let mut kinds = present.iter().filter(|(count, _)| *count > 0);
        match (kinds.next(), kinds.next()) {
            (None, _) => DominantChange::NoChange,
            (Some((_, kind)), None) => *kind,
            _ => DominantChange::Mixed,
        }
    }
}

/// Full outcome of one comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub params: MatchParams,
    pub frame: ImageSize,
    /// Resizes in match order, then new buildings, then demolitions.
    pub records: Vec<ChangeRecord>,
    pub pairs: Vec<MatchedPair>,
    pub summary: ChangeSummary,
}

impl ChangeReport {
    pub fn records_of(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }
}

/// Compares detection sets with a fixed, validated set of thresholds.
#[derive(Clone, Copy, Debug)]
pub struct ChangeMatcher {
    params: MatchParams,
}

impl ChangeMatcher {
    pub fn new(params: MatchParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &MatchParams {
        &self.params
    }

    pub fn compare(
        &self,
        earlier: &DetectionSet,
        recent: &DetectionSet,
        frame: ImageSize,
    ) -> ChangeReport {
        let earlier = earlier.as_slice();
        let recent = recent.as_slice();
        let mut matched_earlier = vec![false; earlier.len()];
        let mut matched_recent = vec![false; recent.len()];
        let mut records = Vec::new();
        let mut pairs = Vec::new();

        for (i, current) in recent.iter().enumerate() {
            let Some((j, iou)) = self.best_candidate(current, earlier, &matched_earlier) else {
                continue;
            };
            if iou <= self.params.iou_threshold {
                continue;
            }
            matched_recent[i] = true;
            matched_earlier[j] = true;

            let resize = AreaChange::between(&earlier[j], current);
            let changed = resize.ratio > self.params.area_change_threshold;
            log::debug!(
                "recent #{} matched earlier #{} (iou {:.3}, area ratio {:.3})",
                i,
                j,
                iou,
                resize.ratio
            );
            pairs.push(MatchedPair {
                earlier_index: j,
                recent_index: i,
                iou,
                changed,
            });
            if changed {
                let kind = if resize.delta > 0.0 {
                    ChangeKind::Extended
                } else {
                    ChangeKind::Shrunk
                };
                records.push(ChangeRecord {
                    kind,
                    position: current.center(),
                    area: current.area(),
                    confidence: current.confidence,
                    earlier_index: Some(j),
                    recent_index: Some(i),
                    resize: Some(resize),
                });
            }
        }

        records.extend(
            recent
                .iter()
                .enumerate()
                .filter(|(i, _)| !matched_recent[*i])
                .map(|(i, d)| ChangeRecord::new_building(i, d)),
        );
        records.extend(
            earlier
                .iter()
                .enumerate()
                .filter(|(j, _)| !matched_earlier[*j])
                .map(|(j, d)| ChangeRecord::demolished(j, d)),
        );

        let summary = ChangeSummary::from_records(&records, pairs.len(), frame);
        log::info!(
            "compared {} earlier / {} recent detections: {} new, {} demolished, {} extended, {} shrunk, {} unchanged",
            earlier.len(),
            recent.len(),
            summary.new_buildings,
            summary.demolished_buildings,
            summary.extended,
            summary.shrunk,
            summary.unchanged_pairs()
        );

        ChangeReport {
            params: self.params,
            frame,
            records,
            pairs,
            summary,
        }
    }

    /// Highest-IOU unmatched earlier detection. Only a strictly higher IOU
    /// replaces the running best, so ties keep the first candidate and a
    /// zero overlap never qualifies.
    fn best_candidate(
        &self,
        current: &Detection,
        earlier: &[Detection],
        matched_earlier: &[bool],
    ) -> Option<(usize, f64)> {
        let center = current.center();
        let mut best: Option<(usize, f64)> = None;
        for (j, candidate) in earlier.iter().enumerate() {
            if matched_earlier[j] {
                continue;
            }
            if let Some(max) = self.params.max_center_distance {
                if center.distance(&candidate.center()) >= max {
                    continue;
                }
            }
            let iou = current.bbox.iou(&candidate.bbox);
            if iou > best.map_or(0.0, |(_, b)| b) {
                best = Some((j, iou));
            }
        }
        best
    }
}

/// One-shot comparison: validates `params`, then runs the matcher.
pub fn match_detections(
    earlier: &DetectionSet,
    recent: &DetectionSet,
    params: MatchParams,
    frame: ImageSize,
) -> Result<ChangeReport> {
    Ok(ChangeMatcher::new(params)?.compare(earlier, recent, frame))
}
