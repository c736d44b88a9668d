use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::geometry::{BBox, ImageSize, Point};

/// One detected building instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    /// Confidence in [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            label: None,
        }
    }

    pub fn area(&self) -> f64 {
        self.bbox.area()
    }

    pub fn center(&self) -> Point {
        self.bbox.center()
    }
}

/// Confidence assumed for a detection that carries none. Detectors that do not
/// score their output (segmentation masks) report full confidence.
pub const UNSCORED_CONFIDENCE: f32 = 1.0;

/// Loosely typed detector output, as emitted by the detection service.
///
/// Every field is optional and untyped; only the bbox decides whether the
/// entry survives `DetectionSet::from_raw`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub bbox: Option<Value>,
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub label: Option<Value>,
    #[serde(default)]
    pub class: Option<Value>,
    #[serde(default)]
    pub width: Option<Value>,
    #[serde(default)]
    pub height: Option<Value>,
}

impl RawDetection {
    /// Converts into a typed detection.
    ///
    /// Returns `Ok(None)` when the entry carries no bbox at all (e.g. a
    /// segmentation result) and `Err` when the bbox is malformed. Ancillary
    /// fields of the wrong type are dropped, never fatal.
    pub fn into_detection(self) -> Result<Option<Detection>> {
        let Some(bbox_value) = self.bbox else {
            return Ok(None);
        };
        let coords = bbox_value
            .as_array()
            .ok_or_else(|| anyhow!("bbox is not an array: {}", bbox_value))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| anyhow!("bbox coordinate is not numeric: {}", v))
            })
            .collect::<Result<Vec<f64>>>()?;
        let bbox = BBox::from_slice(&coords)?;

        let confidence = match self.confidence {
            None | Some(Value::Null) => UNSCORED_CONFIDENCE,
            Some(value) => match value_f64(&value) {
                Some(c) => c as f32,
                None => {
                    log::warn!(
                        "confidence {} is not numeric, assuming {}",
                        value,
                        UNSCORED_CONFIDENCE
                    );
                    UNSCORED_CONFIDENCE
                }
            },
        };

        let mut detection = Detection::new(bbox, confidence);
        detection.label = self
            .label
            .as_ref()
            .and_then(value_label)
            .or_else(|| self.class.as_ref().and_then(value_label));
        Ok(Some(detection))
    }

    fn frame(&self) -> Option<ImageSize> {
        frame_from(self.width.as_ref(), self.height.as_ref())
    }
}

/// Finite number, or a string holding one.
fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite())
}

/// Class names come as strings; YOLO-style exports use numeric class ids.
fn value_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pixel dimension: a non-negative whole number, possibly written as a float.
fn value_dimension(value: &Value) -> Option<u32> {
    let v = value_f64(value)?;
    if v < 0.0 || v > f64::from(u32::MAX) || v.fract() != 0.0 {
        return None;
    }
    Some(v as u32)
}

fn frame_from(width: Option<&Value>, height: Option<&Value>) -> Option<ImageSize> {
    let width = width.and_then(value_dimension)?;
    let height = height.and_then(value_dimension)?;
    Some(ImageSize::new(width, height))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionFile {
    Bare(Vec<Value>),
    Framed {
        detections: Vec<Value>,
        #[serde(default)]
        width: Option<Value>,
        #[serde(default)]
        height: Option<Value>,
    },
}

/// Ordered detections for one image. Duplicates and overlaps are kept.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSet {
    detections: Vec<Detection>,
    /// Frame size reported by the detector, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<ImageSize>,
}

impl DetectionSet {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            frame: None,
        }
    }

    /// Builds a set from raw detector output, skipping entries without a bbox
    /// and rejecting malformed ones individually.
    pub fn from_raw(raw: Vec<RawDetection>) -> Self {
        let mut frame = None;
        let mut detections = Vec::with_capacity(raw.len());
        for (index, entry) in raw.into_iter().enumerate() {
            if frame.is_none() {
                frame = entry.frame();
            }
            match entry.into_detection() {
                Ok(Some(detection)) => detections.push(detection),
                Ok(None) => log::debug!("detection #{} has no bbox, skipped", index),
                Err(e) => log::warn!("detection #{} rejected: {}", index, e),
            }
        }
        Self { detections, frame }
    }

    /// Parses either a bare JSON array of detections or an object with a
    /// `detections` array and optional `width`/`height`.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: DetectionFile =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid detection json: {}", e))?;
        let (entries, file_frame) = match file {
            DetectionFile::Bare(entries) => (entries, None),
            DetectionFile::Framed {
                detections,
                width,
                height,
            } => (detections, frame_from(width.as_ref(), height.as_ref())),
        };

        let mut raw = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<RawDetection>(entry) {
                Ok(det) => raw.push(det),
                Err(e) => log::warn!("detection #{} is not an object, skipped: {}", index, e),
            }
        }

        let mut set = Self::from_raw(raw);
        if file_frame.is_some() {
            set.frame = file_frame;
        }
        Ok(set)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read detections {}: {}", path.display(), e))?;
        Self::from_json_str(&raw).map_err(|e| anyhow!("{}: {}", path.display(), e))
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    /// Keeps detections with `confidence >= threshold`, preserving order.
    pub fn filter_confidence(&self, threshold: f32) -> Self {
        Self {
            detections: self
                .detections
                .iter()
                .filter(|d| d.confidence >= threshold)
                .cloned()
                .collect(),
            frame: self.frame,
        }
    }

    /// Confidence of the first detection, if any.
    pub fn lead_confidence(&self) -> Option<f32> {
        self.detections.first().map(|d| d.confidence)
    }
}

impl FromIterator<Detection> for DetectionSet {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}
