use anyhow::Result;

use crate::detect::result::DetectionSet;

/// Building detector backend.
///
/// Model inference lives outside this crate. A backend turns one image into a
/// `DetectionSet` of axis-aligned boxes; the change matcher trusts its output
/// and never checks model correctness.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on an image.
    ///
    /// Only detections with `confidence >= conf_threshold` are returned.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        conf_threshold: f32,
    ) -> Result<DetectionSet>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
