//! Evidence capture for confirmed detections.
//!
//! The captured frame is PNG-encoded in memory; dispatch works from that
//! buffer. Writing a copy under the evidence directory is a side channel.
//! Names have one-second granularity, so two captures in the same second share
//! a name and the later file overwrites the earlier one.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::frame::Frame;

pub const DEFAULT_EVIDENCE_DIR: &str = "./detected";

/// Encoded evidence image.
#[derive(Clone, PartialEq, Eq)]
pub struct Evidence {
    pub bytes: Vec<u8>,
    /// `screenshot_<YYYYMMDD_HHMMSS>.png`
    pub name: String,
}

impl Evidence {
    pub fn new(bytes: Vec<u8>, name: impl Into<String>) -> Self {
        Self {
            bytes,
            name: name.into(),
        }
    }

    pub fn sha256(&self) -> [u8; 32] {
        Sha256::digest(&self.bytes).into()
    }

    /// Name derived from the image content: `<stem>_<16 hex digest chars>.<ext>`.
    pub fn content_name(&self) -> String {
        let digest = hex::encode(self.sha256());
        let short = &digest[..16];
        let path = Path::new(&self.name);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("evidence");
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}_{short}.{ext}"),
            None => format!("{stem}_{short}"),
        }
    }
}

impl std::fmt::Debug for Evidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evidence")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// File name for evidence captured at `at`.
pub fn evidence_name(at: DateTime<Utc>) -> String {
    format!("screenshot_{}.png", at.format("%Y%m%d_%H%M%S"))
}

#[derive(Clone, Debug)]
pub struct EvidenceCapture {
    dir: PathBuf,
    persist: bool,
}

impl EvidenceCapture {
    pub fn new(dir: impl Into<PathBuf>, persist: bool) -> Self {
        Self {
            dir: dir.into(),
            persist,
        }
    }

    /// In-memory only; nothing touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_EVIDENCE_DIR),
            persist: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Encodes `frame` as PNG and, when persistence is enabled, writes it under
    /// the evidence directory (created on demand).
    pub fn capture(&self, frame: &Frame, at: DateTime<Utc>) -> Result<Evidence> {
        let bytes = encode_png(frame)?;
        let evidence = Evidence::new(bytes, evidence_name(at));

        if self.persist {
            let path = self.persist_copy(&evidence)?;
            log::info!("evidence saved as {}", path.display());
        } else {
            log::info!("evidence captured as {} (in memory)", evidence.name);
        }
        Ok(evidence)
    }

    fn persist_copy(&self, evidence: &Evidence) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create evidence directory {}", self.dir.display())
        })?;
        let path = self.dir.join(&evidence.name);
        std::fs::write(&path, &evidence.bytes)
            .with_context(|| format!("failed to write evidence {}", path.display()))?;
        Ok(path)
    }
}

impl Default for EvidenceCapture {
    fn default() -> Self {
        Self::new(DEFAULT_EVIDENCE_DIR, true)
    }
}

fn encode_png(frame: &Frame) -> Result<Vec<u8>> {
    let image = RgbImage::from_raw(frame.width, frame.height, frame.rgb().to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("png encode")?;
    Ok(out.into_inner())
}
