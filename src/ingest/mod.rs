//! Frame sources.
//!
//! The detection loop pulls frames from a `FrameSource` until it reports the
//! end of the stream. Sources own pacing and sequence numbering; they never
//! interpret pixel content.
//!
//! - `TraceSource`: replays a recorded landmark trace as a stream of blank
//!   frames (one per trace line), paired with `detect::ReplayExtractor`.

pub mod trace;

use anyhow::Result;

use crate::frame::Frame;

pub use trace::{LandmarkTrace, TraceConfig, TraceSource, TraceStats};

pub trait FrameSource {
    /// Human-readable source identifier for logs.
    fn name(&self) -> &str;

    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}
