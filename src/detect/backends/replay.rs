use anyhow::Result;
use std::sync::Arc;

use crate::detect::backend::LandmarkExtractor;
use crate::frame::Frame;
use crate::ingest::LandmarkTrace;
use crate::landmarks::LandmarkSnapshot;

/// Serves landmarks recorded in a trace, keyed by frame sequence number.
pub struct ReplayExtractor {
    trace: Arc<LandmarkTrace>,
}

impl ReplayExtractor {
    pub fn new(trace: Arc<LandmarkTrace>) -> Self {
        Self { trace }
    }
}

impl LandmarkExtractor for ReplayExtractor {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn extract(&mut self, frame: &Frame) -> Result<Option<LandmarkSnapshot>> {
        Ok(self.trace.get(frame.sequence).cloned())
    }
}
