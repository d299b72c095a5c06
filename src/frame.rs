//! Captured video frames.
//!
//! A `Frame` is a tightly packed RGB8 buffer as delivered by a frame source.
//! It lives for one loop iteration unless evidence capture encodes it.

use anyhow::{anyhow, Result};
use std::time::Instant;

/// Bytes per RGB8 pixel.
pub const RGB_CHANNELS: usize = 3;

pub struct Frame {
    rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic position in the source stream.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(rgb: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * RGB_CHANNELS;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if rgb.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb",
                rgb.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            rgb,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Uniform gray frame, used by synthetic sources.
    pub fn blank(width: u32, height: u32, sequence: u64) -> Result<Self> {
        let len = (width as usize) * (height as usize) * RGB_CHANNELS;
        Self::new(vec![0x40; len], width, height, sequence)
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    pub fn byte_len(&self) -> usize {
        self.rgb.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel data is deliberately left out of debug output.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.rgb.len())
            .finish()
    }
}
