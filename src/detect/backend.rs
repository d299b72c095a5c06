use anyhow::Result;

use crate::frame::Frame;
use crate::landmarks::LandmarkSnapshot;

/// Hand landmark extractor.
///
/// This is the seam to the external pose model. Implementations return at
/// most one hand per frame; when several are visible the implementation picks
/// one before returning. The frame is borrowed for the call only.
pub trait LandmarkExtractor {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Landmarks for the most prominent hand, or `None` if no hand is visible.
    fn extract(&mut self, frame: &Frame) -> Result<Option<LandmarkSnapshot>>;
}
