//! Landmark trace replay.
//!
//! A trace is a JSON-Lines file. Each non-empty line is either `null` (no
//! hand visible in that frame) or an array of 21 `[x, y, z]` triples. Lines
//! starting with `#` are comments.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::Frame;
use crate::landmarks::LandmarkSnapshot;

/// Recorded per-frame extractor output, indexed by frame sequence.
#[derive(Clone, Debug, Default)]
pub struct LandmarkTrace {
    frames: Vec<Option<LandmarkSnapshot>>,
}

impl LandmarkTrace {
    pub fn new(frames: Vec<Option<LandmarkSnapshot>>) -> Self {
        Self { frames }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read landmark trace {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid landmark trace {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut frames = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line == "null" {
                frames.push(None);
                continue;
            }
            let snapshot = LandmarkSnapshot::from_json(line)
                .with_context(|| format!("line {}", lineno + 1))?;
            frames.push(Some(snapshot));
        }
        if frames.is_empty() {
            return Err(anyhow!("trace contains no frames"));
        }
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Landmarks recorded for a frame; `None` when no hand was seen or the
    /// sequence is past the end of the trace.
    pub fn get(&self, sequence: u64) -> Option<&LandmarkSnapshot> {
        let index = usize::try_from(sequence).ok()?;
        self.frames.get(index).and_then(|frame| frame.as_ref())
    }
}

#[derive(Clone, Debug)]
pub struct TraceConfig {
    pub path: PathBuf,
    /// Replay rate. Zero disables pacing.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TraceStats {
    pub frames_emitted: u64,
    pub frames_total: u64,
}

/// Emits one blank frame per trace entry at the configured rate.
pub struct TraceSource {
    config: TraceConfig,
    trace: Arc<LandmarkTrace>,
    name: String,
    next_sequence: u64,
    last_emit: Option<Instant>,
}

impl TraceSource {
    pub fn new(config: TraceConfig, trace: Arc<LandmarkTrace>) -> Self {
        let name = format!("trace://{}", config.path.display());
        Self {
            config,
            trace,
            name,
            next_sequence: 0,
            last_emit: None,
        }
    }

    pub fn stats(&self) -> TraceStats {
        TraceStats {
            frames_emitted: self.next_sequence,
            frames_total: self.trace.len() as u64,
        }
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.config.target_fps;
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

impl FrameSource for TraceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_sequence >= self.trace.len() as u64 {
            return Ok(None);
        }
        self.pace();
        let frame = Frame::blank(self.config.width, self.config.height, self.next_sequence)?;
        self.next_sequence += 1;
        Ok(Some(frame))
    }
}
