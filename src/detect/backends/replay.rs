use anyhow::{anyhow, Result};
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::DetectionSet;
use crate::geometry::ImageSize;

/// Replays a pre-recorded detection set for every image.
///
/// Used when detections were produced offline by an external model and saved
/// as JSON. The confidence threshold is applied on each call.
pub struct ReplayBackend {
    recorded: DetectionSet,
}

impl ReplayBackend {
    pub fn new(recorded: DetectionSet) -> Self {
        Self { recorded }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        Ok(Self::new(DetectionSet::from_json_file(path)?))
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(
        &mut self,
        _pixels: &[u8],
        width: u32,
        height: u32,
        conf_threshold: f32,
    ) -> Result<DetectionSet> {
        if !(0.0..=1.0).contains(&conf_threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                conf_threshold
            ));
        }
        let mut out = self.recorded.filter_confidence(conf_threshold);
        if out.frame.is_none() && width > 0 && height > 0 {
            out.frame = Some(ImageSize::new(width, height));
        }
        Ok(out)
    }
}
