//! Hand landmark snapshots.
//!
//! A snapshot is the output of the external landmark extractor for one frame:
//! exactly 21 points in frame-normalized coordinates, indexed by the fixed
//! MediaPipe hand topology. `y` grows downward (image space), so a finger tip
//! "above" its PIP joint has the smaller `y`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Number of points in one hand snapshot.
pub const LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_PIP: usize = 6;
pub const INDEX_DIP: usize = 7;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_DIP: usize = 11;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_PIP: usize = 14;
pub const RING_DIP: usize = 15;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_DIP: usize = 19;
pub const PINKY_TIP: usize = 20;

/// (tip, PIP) index pairs for the four long fingers.
pub const FINGER_TIP_PIP: [(usize, usize); 4] = [
    (INDEX_TIP, INDEX_PIP),
    (MIDDLE_TIP, MIDDLE_PIP),
    (RING_TIP, RING_PIP),
    (PINKY_TIP, PINKY_PIP),
];

/// One tracked point, normalized to the frame (roughly 0..1 on x and y).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Landmark {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Immutable set of 21 landmarks for a single hand.
///
/// The fixed-size array makes a short or over-long snapshot unrepresentable,
/// so classifiers can index without bounds checks failing at runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSnapshot {
    points: [Landmark; LANDMARK_COUNT],
}

impl LandmarkSnapshot {
    pub fn new(points: [Landmark; LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    /// Builds a snapshot from a slice, rejecting anything but 21 points.
    pub fn from_slice(points: &[Landmark]) -> Result<Self> {
        let points: [Landmark; LANDMARK_COUNT] = points.try_into().map_err(|_| {
            anyhow!(
                "hand snapshot must have {} landmarks, got {}",
                LANDMARK_COUNT,
                points.len()
            )
        })?;
        Ok(Self { points })
    }

    /// Parses `[[x, y, z], ...]` (21 triples).
    pub fn from_json(raw: &str) -> Result<Self> {
        let triples: Vec<[f32; 3]> =
            serde_json::from_str(raw).context("parse landmark snapshot JSON")?;
        let points: Vec<Landmark> = triples.into_iter().map(Landmark::from).collect();
        Self::from_slice(&points)
    }

    pub fn point(&self, index: usize) -> Landmark {
        self.points[index]
    }

    pub fn points(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.points
    }

    /// Returns a copy with one point replaced.
    pub fn with_point(mut self, index: usize, point: Landmark) -> Self {
        self.points[index] = point;
        self
    }
}
